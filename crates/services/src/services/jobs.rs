//! In-process job queue for work that should not hold up a request: large
//! imports, outgoing mail and webhook calls.

use db::{DBService, models::task::CreateTask};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::services::{
    importer::{self, ImportError},
    mail::{Mail, MailService},
    webhook::{WebhookPayload, WebhookService},
};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job queue is not running")]
    Closed,
}

#[derive(Debug)]
pub enum Job {
    ImportTasks {
        project_id: i64,
        project_name: String,
        tasks: Vec<CreateTask>,
        /// Address told about the result once the import finished.
        notify: Option<String>,
    },
    SendMail(Mail),
    Webhook {
        url: String,
        payload: WebhookPayload,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::ImportTasks { .. } => "import_tasks",
            Job::SendMail(_) => "send_mail",
            Job::Webhook { .. } => "webhook",
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, job: Job) -> Result<(), JobError> {
        tracing::debug!("Enqueueing {} job", job.name());
        self.sender.send(job).map_err(|_| JobError::Closed)
    }
}

pub struct JobWorker {
    db: DBService,
    mail: MailService,
    webhooks: WebhookService,
}

impl JobWorker {
    pub fn new(db: DBService, mail: MailService, webhooks: WebhookService) -> Self {
        Self { db, mail, webhooks }
    }

    /// Runs jobs one at a time until every `JobQueue` handle is dropped.
    pub fn spawn(self, mut receiver: mpsc::UnboundedReceiver<Job>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                self.run(job).await;
            }
            tracing::debug!("Job queue closed, worker exiting");
        })
    }

    async fn run(&self, job: Job) {
        let name = job.name();
        match job {
            Job::ImportTasks {
                project_id,
                project_name,
                tasks,
                notify,
            } => {
                let result = importer::store_new_tasks(&self.db.pool, project_id, tasks).await;
                let body = match &result {
                    Ok(n) => format!(
                        "Hello,\n\n{n} new tasks were imported into your project {project_name}.\n"
                    ),
                    Err(ImportError::NoNewRecords) => format!(
                        "Hello,\n\nThe import into your project {project_name} finished, but there were no new records.\n"
                    ),
                    Err(e) => {
                        tracing::error!("Background import into project {} failed: {}", project_id, e);
                        format!(
                            "Hello,\n\nThe import into your project {project_name} failed: {e}\n"
                        )
                    }
                };
                if let Some(recipient) = notify {
                    self.mail
                        .deliver(Mail::to(
                            recipient,
                            format!("Tasks Import to your project {project_name}"),
                            body,
                        ))
                        .await;
                }
            }
            Job::SendMail(mail) => self.mail.deliver(mail).await,
            Job::Webhook { url, payload } => {
                if let Err(e) = self.webhooks.deliver(&url, &payload).await {
                    tracing::warn!("Webhook {} to {} failed: {}", payload.event, url, e);
                }
            }
        }
        tracing::debug!("Finished {} job", name);
    }
}
