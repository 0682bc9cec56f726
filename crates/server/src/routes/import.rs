use axum::{
    Extension, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{project::Project, user::User};
use deployment::Deployment;
use serde::Serialize;
use services::services::importer::{ImportOutcome, ImportSource};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

const FORM_TYPES: [&str; 5] = ["csv", "gdocs", "json", "epicollect", "upload"];

#[derive(Debug, Serialize, TS)]
pub struct ImportOptions {
    pub formtypes: Vec<String>,
    pub max_sync_import: usize,
}

pub async fn import_options(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<ImportOptions>>, ApiError> {
    identity.manager_of(&project)?;
    Ok(ResponseJson(ApiResponse::success(ImportOptions {
        formtypes: FORM_TYPES.iter().map(|f| f.to_string()).collect(),
        max_sync_import: deployment.config().read().await.max_sync_import,
    })))
}

/// A `text/csv` body is an upload; anything else is a JSON form selected by `formtype`.
fn import_source(headers: &HeaderMap, body: &[u8]) -> Result<ImportSource, ApiError> {
    let is_csv = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/csv"));
    if is_csv {
        let content = String::from_utf8(body.to_vec())
            .map_err(|_| ApiError::BadRequest("The uploaded file is not valid UTF-8".to_string()))?;
        return Ok(ImportSource::Upload { content });
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid import form: {e}")))
}

pub async fn import_tasks(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ResponseJson<ApiResponse<usize>>, ApiError> {
    identity.manager_of(&project)?;
    let source = import_source(&headers, &body)?;
    let pool = &deployment.db().pool;
    let max_sync = deployment.config().read().await.max_sync_import;
    let notify = User::find_by_id(pool, project.owner_id)
        .await?
        .map(|owner| owner.email_addr);

    let outcome = deployment
        .importer()
        .import(pool, &project, &source, max_sync, deployment.jobs(), notify)
        .await?;
    let n = match outcome {
        ImportOutcome::Imported(n) | ImportOutcome::Queued(n) => n,
    };
    Ok(ResponseJson(ApiResponse::success_with_message(
        n,
        outcome.message(),
    )))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/tasks/import", get(import_options).post(import_tasks))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn csv_bodies_are_uploads() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8"));
        match import_source(&headers, b"question\nwhat?").unwrap() {
            ImportSource::Upload { content } => assert_eq!(content, "question\nwhat?"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn json_forms_select_by_formtype() {
        let headers = HeaderMap::new();
        let body = br#"{"formtype": "csv", "csv_url": "http://example.com/t.csv"}"#;
        assert!(matches!(
            import_source(&headers, body).unwrap(),
            ImportSource::Csv { .. }
        ));
        assert!(import_source(&headers, br#"{"formtype": "xml"}"#).is_err());
    }
}
