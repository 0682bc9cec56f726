use std::path::PathBuf;

use thiserror::Error;

mod versions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Config = versions::v2::Config;

impl Config {
    /// Rejects values the rest of the system cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_page < 1 {
            return Err(ConfigError::ValidationError(
                "per_page must be at least 1".to_string(),
            ));
        }
        if self.secret_key.len() < 16 {
            return Err(ConfigError::ValidationError(
                "secret_key must be at least 16 characters".to_string(),
            ));
        }
        if self.session_ttl_hours < 1 {
            return Err(ConfigError::ValidationError(
                "session_ttl_hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL for a path on this deployment.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Will always return config, trying old schemas or eventually returning default
pub async fn load_config_from_file(config_path: &PathBuf) -> Config {
    match std::fs::read_to_string(config_path) {
        Ok(raw_config) => Config::from(raw_config),
        Err(_) => {
            tracing::info!("No config file found, creating one");
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(
    config: &Config,
    config_path: &PathBuf,
) -> Result<(), ConfigError> {
    let raw_config = serde_json::to_string_pretty(config)?;
    std::fs::write(config_path, raw_config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_file(&dir.path().join("config.json")).await;
        assert_eq!(config.config_version, "v2");
        assert_eq!(config.max_sync_import, 300);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn v1_file_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"base_url":"https://crowd.example.org","secret_key":"0123456789abcdef0123","per_page":10,"account_validation":true}"#,
        )
        .unwrap();
        let config = load_config_from_file(&path).await;
        assert_eq!(config.config_version, "v2");
        assert_eq!(config.base_url, "https://crowd.example.org");
        assert_eq!(config.per_page, 10);
        assert!(config.account_validation);
        assert_eq!(config.max_sync_import, 300);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.ckan_url = Some("http://ckan.example.org".into());
        save_config_to_file(&config, &path).await.unwrap();
        let loaded = load_config_from_file(&path).await;
        assert_eq!(loaded.ckan_url.as_deref(), Some("http://ckan.example.org"));
        assert_eq!(loaded.secret_key, config.secret_key);
    }

    #[test]
    fn url_for_joins_cleanly() {
        let mut config = Config::default();
        config.base_url = "http://localhost:3000/".into();
        assert_eq!(
            config.url_for("/api/project/1"),
            "http://localhost:3000/api/project/1"
        );
    }
}
