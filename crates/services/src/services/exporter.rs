use std::collections::BTreeSet;

use db::models::{project::Project, task::Task, task_run::TaskRun};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

use crate::services::ckan::{CkanClient, CkanError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("CSV output is not valid UTF-8")]
    Utf8,
    #[error("project does not have tasks")]
    NoTasks,
    #[error("project does not have task runs")]
    NoTaskRuns,
    #[error(transparent)]
    Ckan(#[from] CkanError),
    #[error("CKAN export is not configured")]
    CkanNotConfigured,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExportType {
    Task,
    TaskRun,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Ckan,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json | ExportFormat::Ckan => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// What the export page offers.
#[derive(Debug, Clone, Serialize, TS)]
pub struct ExportSummary {
    pub types: Vec<ExportType>,
    pub formats: Vec<ExportFormat>,
    pub n_tasks: i64,
    pub n_task_runs: i64,
}

pub async fn summary(pool: &SqlitePool, project_id: i64) -> Result<ExportSummary, ExportError> {
    Ok(ExportSummary {
        types: vec![ExportType::Task, ExportType::TaskRun],
        formats: vec![ExportFormat::Json, ExportFormat::Csv, ExportFormat::Ckan],
        n_tasks: Task::count_by_project(pool, project_id).await?,
        n_task_runs: TaskRun::count_by_project(pool, project_id).await?,
    })
}

/// `{short_name}_{type}.{format}`, kept verbatim for non-latin short names.
pub fn filename(short_name: &str, ty: ExportType, format: ExportFormat) -> String {
    format!("{short_name}_{ty}.{format}")
}

/// Every task or task run of the project as JSON objects.
pub async fn records(
    pool: &SqlitePool,
    project_id: i64,
    ty: ExportType,
) -> Result<Vec<Value>, ExportError> {
    let values = match ty {
        ExportType::Task => Task::find_by_project_id(pool, project_id)
            .await?
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?,
        ExportType::TaskRun => TaskRun::find_by_project_id(pool, project_id)
            .await?
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(values)
}

pub fn to_json(records: &[Value]) -> Result<String, ExportError> {
    Ok(serde_json::to_string(records)?)
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// One row per record: `{type}__{field}` columns for the record fields,
/// `info` included as a JSON string, then `{type}info__{key}` columns for
/// every key found in any `info` object.
pub fn to_csv(records: &[Value], ty: ExportType) -> Result<String, ExportError> {
    let Some(first) = records.first() else {
        return Err(match ty {
            ExportType::Task => ExportError::NoTasks,
            ExportType::TaskRun => ExportError::NoTaskRuns,
        });
    };

    let fields: Vec<String> = first
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let info_keys: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.get("info").and_then(Value::as_object))
        .flat_map(|info| info.keys().cloned())
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = fields
        .iter()
        .map(|f| format!("{ty}__{f}"))
        .chain(info_keys.iter().map(|k| format!("{ty}info__{k}")));
    writer.write_record(header)?;

    for record in records {
        let info = record.get("info");
        let row = fields.iter().map(|f| cell(record.get(f))).chain(
            info_keys
                .iter()
                .map(|k| cell(info.and_then(|i| i.get(k)))),
        );
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    String::from_utf8(bytes).map_err(|_| ExportError::Utf8)
}

/// Pushes the export to CKAN and returns the CKAN URL for the success message.
pub async fn to_ckan(
    client: reqwest::Client,
    ckan_url: Option<&str>,
    api_key: Option<&str>,
    project: &Project,
    project_url: &str,
    ty: ExportType,
    records: &[Value],
) -> Result<String, ExportError> {
    let (Some(ckan_url), Some(api_key)) = (ckan_url, api_key) else {
        return Err(ExportError::CkanNotConfigured);
    };
    if records.is_empty() {
        return Err(match ty {
            ExportType::Task => ExportError::NoTasks,
            ExportType::TaskRun => ExportError::NoTaskRuns,
        });
    }
    CkanClient::new(client, ckan_url, api_key)
        .publish(project, project_url, &ty.to_string(), records)
        .await?;
    Ok(ckan_url.to_string())
}
