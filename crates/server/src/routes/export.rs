use std::collections::HashMap;

use axum::{
    Extension, Router,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::get,
};
use db::models::project::Project;
use deployment::Deployment;
use services::services::exporter::{self, ExportFormat, ExportType};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

/// The requested export, or `None` for the summary page.
fn parse_request(
    params: &HashMap<String, String>,
) -> Result<Option<(ExportType, ExportFormat)>, ApiError> {
    let ty = params.get("type");
    let format = params.get("format");
    if ty.is_none() && format.is_none() {
        return Ok(None);
    }
    let ty = ty
        .and_then(|t| t.parse::<ExportType>().ok())
        .ok_or_else(ApiError::not_found)?;
    let format = format.ok_or_else(ApiError::not_found)?;
    let format = format.parse::<ExportFormat>().map_err(|_| {
        ApiError::UnsupportedMediaType(format!("Format {format} not supported"))
    })?;
    Ok(Some((ty, format)))
}

fn attachment(body: String, format: ExportFormat, filename: &str) -> Result<Response, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    // Non-latin short names go out as raw UTF-8 bytes.
    let disposition = HeaderValue::from_bytes(
        format!("attachment; filename={filename}").as_bytes(),
    )
    .map_err(|_| ApiError::BadRequest("Invalid export file name".to_string()))?;
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok((StatusCode::OK, headers, body).into_response())
}

pub async fn export_tasks(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let pool = &deployment.db().pool;
    let Some((ty, format)) = parse_request(&params)? else {
        let summary = exporter::summary(pool, project.id).await?;
        return Ok(ResponseJson(ApiResponse::<_, ()>::success(summary)).into_response());
    };

    tracing::debug!("Exporting {} of {} as {}", ty, project.short_name, format);
    let records = exporter::records(pool, project.id, ty).await?;
    let filename = exporter::filename(&project.short_name, ty, format);
    match format {
        ExportFormat::Json => attachment(exporter::to_json(&records)?, format, &filename),
        ExportFormat::Csv => attachment(exporter::to_csv(&records, ty)?, format, &filename),
        ExportFormat::Ckan => {
            let user = identity.manager_of(&project)?;
            let config = deployment.config().read().await.clone();
            let project_url = config.url_for(&format!("project/{}", project.short_name));
            let ckan_url = exporter::to_ckan(
                deployment.http().clone(),
                config.ckan_url.as_deref(),
                user.ckan_api.as_deref(),
                &project,
                &project_url,
                ty,
                &records,
            )
            .await?;
            tracing::info!("Exported {} of {} to CKAN", ty, project.short_name);
            Ok(ResponseJson(ApiResponse::<(), ()>::success_with_message(
                (),
                format!("Data exported to {ckan_url}"),
            ))
            .into_response())
        }
    }
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/tasks/export", get(export_tasks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn request_validation() {
        assert!(parse_request(&params(&[])).unwrap().is_none());
        assert_eq!(
            parse_request(&params(&[("type", "task_run"), ("format", "csv")])).unwrap(),
            Some((ExportType::TaskRun, ExportFormat::Csv))
        );

        let missing_format = parse_request(&params(&[("type", "task")])).unwrap_err();
        assert!(matches!(missing_format, ApiError::NotFound(_)));
        let bad_type = parse_request(&params(&[("type", "wrong"), ("format", "json")])).unwrap_err();
        assert!(matches!(bad_type, ApiError::NotFound(_)));
        let bad_format = parse_request(&params(&[("type", "task"), ("format", "xml")])).unwrap_err();
        assert!(matches!(bad_format, ApiError::UnsupportedMediaType(_)));
    }
}
