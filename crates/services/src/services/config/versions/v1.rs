use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct Config {
    pub(super) base_url: String,
    pub(super) secret_key: String,
    pub(super) per_page: i64,
    pub(super) account_validation: bool,
}
