pub mod assets;
pub mod response;
pub mod sentry;
pub mod signer;
pub mod text;
pub mod version;

/// Fresh API key handed to new accounts and on key resets.
pub fn new_api_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
