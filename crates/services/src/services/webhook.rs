use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Webhook answered with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct WebhookPayload {
    pub event: String,
    pub project_short_name: String,
    pub project_id: i64,
    pub task_id: i64,
    pub fired_at: DateTime<Utc>,
}

impl WebhookPayload {
    pub fn task_completed(project_short_name: &str, project_id: i64, task_id: i64) -> Self {
        Self {
            event: "task_completed".to_string(),
            project_short_name: project_short_name.to_string(),
            project_id,
            task_id,
            fired_at: Utc::now(),
        }
    }
}

#[derive(Clone, Default)]
pub struct WebhookService {
    client: reqwest::Client,
}

impl WebhookService {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// A webhook is only accepted when a GET to it answers 200.
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::warn!("Webhook {} is not reachable: {}", url, e);
                false
            }
        }
    }

    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::Status(response.status().as_u16()));
        }
        tracing::debug!("Webhook {} delivered to {}", payload.event, url);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{Json, Router, extract::State, http::StatusCode as AxumStatus, routing::get};
    use tokio::sync::Mutex;

    use super::*;

    type Received = Arc<Mutex<Vec<WebhookPayload>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn reachability_requires_200() {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/gone", get(|| async { AxumStatus::NOT_FOUND }));
        let base = serve(router).await;
        let webhooks = WebhookService::default();
        assert!(webhooks.is_reachable(&format!("{base}/ok")).await);
        assert!(!webhooks.is_reachable(&format!("{base}/gone")).await);
        assert!(!webhooks.is_reachable("http://127.0.0.1:1/nothing").await);
    }

    #[tokio::test]
    async fn payload_is_posted_as_json() {
        let received: Received = Arc::default();
        let router = Router::new()
            .route(
                "/hook",
                get(|| async { "ok" }).post(
                    |State(received): State<Received>, Json(payload): Json<WebhookPayload>| async move {
                        received.lock().await.push(payload);
                        "ok"
                    },
                ),
            )
            .with_state(received.clone());
        let base = serve(router).await;

        let payload = WebhookPayload::task_completed("sampleapp", 1, 2);
        WebhookService::default()
            .deliver(&format!("{base}/hook"), &payload)
            .await
            .unwrap();
        let got = received.lock().await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].event, "task_completed");
        assert_eq!(got[0].task_id, 2);
    }
}
