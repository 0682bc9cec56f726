use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    accounts::AccountService,
    auth::AuthService,
    config::{Config, load_config_from_file, save_config_to_file},
    importer::ImporterService,
    jobs::{JobQueue, JobWorker},
    mail::MailService,
    projects::ProjectService,
    webhook::WebhookService,
};
use tokio::sync::RwLock;
use utils::{
    assets::{asset_dir, config_path},
    signer::Signer,
};

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    auth: AuthService,
    accounts: AccountService,
    projects: ProjectService,
    importer: ImporterService,
    jobs: JobQueue,
    mail: MailService,
    http: reqwest::Client,
}

impl LocalDeployment {
    /// Wires the services around an existing config and database and starts
    /// the job worker. Must run inside a tokio runtime.
    pub fn from_parts(config: Config, db: DBService, auth: AuthService) -> Self {
        let http = reqwest::Client::new();
        let signer = Signer::new(&config.secret_key);
        let mail = MailService::new(config.mail_sender.clone());
        let webhooks = WebhookService::new(http.clone());
        let (jobs, receiver) = JobQueue::new();
        JobWorker::new(db.clone(), mail.clone(), webhooks.clone()).spawn(receiver);

        Self {
            accounts: AccountService::new(auth.clone(), signer.clone(), jobs.clone()),
            projects: ProjectService::new(auth.clone(), signer, webhooks),
            importer: ImporterService::new(http.clone()),
            config: Arc::new(RwLock::new(config)),
            db,
            auth,
            jobs,
            mail,
            http,
        }
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        std::fs::create_dir_all(asset_dir())?;
        let raw_config = load_config_from_file(&config_path()).await;
        raw_config.validate()?;

        // Always save config (may have been migrated or got a fresh secret)
        save_config_to_file(&raw_config, &config_path()).await?;

        let db = DBService::new().await?;
        let auth = AuthService::new(raw_config.secret_key.clone(), raw_config.session_ttl_hours);
        let deployment = Self::from_parts(raw_config, db, auth);
        deployment.ensure_default_category().await?;
        Ok(deployment)
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn auth(&self) -> &AuthService {
        &self.auth
    }

    fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    fn projects(&self) -> &ProjectService {
        &self.projects
    }

    fn importer(&self) -> &ImporterService {
        &self.importer
    }

    fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    fn mail(&self) -> &MailService {
        &self.mail
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use services::services::{jobs::Job, mail::Mail};

    use super::*;

    #[tokio::test]
    async fn worker_delivers_queued_mail() {
        let db = DBService::new_in_memory().await.unwrap();
        let deployment = LocalDeployment::from_parts(
            Config::default(),
            db,
            AuthService::new("secret", 1).with_bcrypt_cost(4),
        );
        deployment
            .jobs()
            .enqueue(Job::SendMail(Mail::to("a@example.com", "Hello", "Body")))
            .unwrap();
        for _ in 0..100 {
            if !deployment.mail().sent().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(deployment.mail().sent().await[0].subject, "Hello");

        deployment.ensure_default_category().await.unwrap();
        let hateoas = deployment.hateoas().await;
        assert!(
            hateoas
                .link("self", "project", "http://localhost:3000/api/project/1")
                .contains("rel='self'")
        );
    }
}
