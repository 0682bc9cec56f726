use std::sync::Arc;

use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use db::{DBService, models::category::Category};
use services::services::{
    accounts::AccountService,
    auth::{AuthError, AuthService},
    config::{Config, ConfigError},
    hateoas::Hateoas,
    importer::ImporterService,
    jobs::JobQueue,
    mail::MailService,
    projects::ProjectService,
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;

    fn db(&self) -> &DBService;

    fn auth(&self) -> &AuthService;

    fn accounts(&self) -> &AccountService;

    fn projects(&self) -> &ProjectService;

    fn importer(&self) -> &ImporterService;

    fn jobs(&self) -> &JobQueue;

    fn mail(&self) -> &MailService;

    /// Shared HTTP client for outgoing calls (CKAN, webhooks, imports).
    fn http(&self) -> &reqwest::Client;

    async fn hateoas(&self) -> Hateoas {
        Hateoas::new(&self.config().read().await.base_url)
    }

    /// Startup housekeeping: the default category must exist before the
    /// first project is created through the REST API.
    async fn ensure_default_category(&self) -> Result<(), DeploymentError> {
        let category = Category::ensure_default(&self.db().pool).await?;
        tracing::debug!("Default category is {}", category.short_name);
        Ok(())
    }
}
