pub(super) mod v1;
pub(super) mod v2;
