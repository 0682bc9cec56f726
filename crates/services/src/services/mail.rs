use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

const OUTBOX_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn to(recipient: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients: vec![recipient.into()],
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Outgoing mail. Delivery is logged and the most recent messages are kept
/// in an in-memory outbox.
#[derive(Clone)]
pub struct MailService {
    sender: String,
    outbox: Arc<Mutex<Vec<Mail>>>,
}

impl MailService {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            outbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn deliver(&self, mail: Mail) {
        tracing::info!(
            from = %self.sender,
            to = ?mail.recipients,
            subject = %mail.subject,
            "Sending mail"
        );
        // Bodies carry confirmation and reset keys; only their size is logged.
        tracing::debug!(bytes = mail.body.len(), "Mail body queued");
        let mut outbox = self.outbox.lock().await;
        if outbox.len() >= OUTBOX_LIMIT {
            outbox.remove(0);
        }
        outbox.push(mail);
    }

    pub async fn sent(&self) -> Vec<Mail> {
        self.outbox.lock().await.clone()
    }
}
