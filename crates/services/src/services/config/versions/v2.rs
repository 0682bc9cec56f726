use anyhow::Error;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::services::{config::versions::v1, scheduler::SchedulerKind};

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct Config {
    pub config_version: String,
    /// Public URL of this deployment, used in links and mails.
    pub base_url: String,
    #[serde(default = "random_secret")]
    #[ts(skip)]
    pub secret_key: String,
    pub per_page: i64,
    /// When set, new accounts must confirm their e-mail address first.
    pub account_validation: bool,
    /// Imports up to this many tasks run inline; bigger batches go to the job queue.
    pub max_sync_import: usize,
    pub ckan_url: Option<String>,
    pub mail_sender: String,
    pub default_scheduler: SchedulerKind,
    pub session_ttl_hours: i64,
    /// Take the contributor IP from `X-Forwarded-For`/`X-Real-IP`. Only for
    /// deployments behind a reverse proxy that sets them.
    #[serde(default)]
    pub trust_proxy: bool,
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

impl Config {
    pub fn from_previous_version(raw_config: &str) -> Result<Self, Error> {
        let old_config = match serde_json::from_str::<v1::Config>(raw_config) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("Failed to parse config: {}", e);
                tracing::error!("   at line {}, column {}", e.line(), e.column());
                return Err(e.into());
            }
        };

        let defaults = Self::default();
        Ok(Self {
            config_version: defaults.config_version,
            base_url: old_config.base_url,
            secret_key: old_config.secret_key,
            per_page: old_config.per_page,
            account_validation: old_config.account_validation,
            max_sync_import: defaults.max_sync_import,
            ckan_url: defaults.ckan_url,
            mail_sender: defaults.mail_sender,
            default_scheduler: defaults.default_scheduler,
            session_ttl_hours: defaults.session_ttl_hours,
            trust_proxy: defaults.trust_proxy,
        })
    }
}

impl From<String> for Config {
    fn from(raw_config: String) -> Self {
        if let Ok(config) = serde_json::from_str::<Config>(&raw_config)
            && config.config_version == "v2"
        {
            return config;
        }

        match Self::from_previous_version(&raw_config) {
            Ok(config) => {
                tracing::info!("Config upgraded to v2");
                config
            }
            Err(e) => {
                tracing::warn!("Config migration failed: {}, using default", e);
                Self::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: "v2".to_string(),
            base_url: "http://localhost:3000".to_string(),
            secret_key: random_secret(),
            per_page: 20,
            account_validation: false,
            max_sync_import: 300,
            ckan_url: None,
            mail_sender: "crowdwork@localhost".to_string(),
            default_scheduler: SchedulerKind::Default,
            session_ttl_hours: 24 * 7,
            trust_proxy: false,
        }
    }
}
