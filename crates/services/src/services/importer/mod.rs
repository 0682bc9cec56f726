//! Bulk task import: fetch a document, parse it, drop tasks that already
//! exist, then store the rest inline or hand them to the job queue.

use std::collections::HashSet;

use db::models::{
    project::Project,
    task::{CreateTask, Task, TaskFieldError},
};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;

use crate::services::jobs::{Job, JobError, JobQueue};

pub mod parse;

pub use parse::{canonical_key, tasks_from_csv, tasks_from_json};

pub const EPICOLLECT_BASE_URL: &str = "https://plus.epicollect.net";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Oops! It looks like you don't have permission to access that file")]
    Forbidden,
    #[error("Oops! That file doesn't look like the right file.")]
    WrongFileType,
    #[error("Oops! It looks like you don't have permission to access the EpiCollect Plus project")]
    EpicollectForbidden,
    #[error("Oops! That project and form do not look like the right one.")]
    EpicollectWrongType,
    #[error("Oops! The remote server answered with status {0}")]
    RemoteStatus(u16),
    #[error("Oops! The file could not be fetched: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("The file you uploaded has two headers with the same name.")]
    DuplicateHeader,
    #[error("Oops! It looks like the file is empty.")]
    EmptyFile,
    #[error("Oops! The file is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Oops! The file is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid value '{value}' for {column}")]
    InvalidValue { column: String, value: String },
    #[error("{0}")]
    MissingField(&'static str),
    #[error("It looks like there were no new records to import")]
    NoNewRecords,
    #[error("Oops! {0}")]
    InvalidTask(#[from] TaskFieldError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Queue(#[from] JobError),
}

/// Where tasks come from, selected by `formtype`.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(tag = "formtype", rename_all = "lowercase")]
pub enum ImportSource {
    Csv { csv_url: String },
    Gdocs { googledocs_url: String },
    Json { json_url: String },
    Epicollect {
        epicollect_project: String,
        epicollect_form: String,
    },
    Upload { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(usize),
    Queued(usize),
}

impl ImportOutcome {
    pub fn message(&self) -> String {
        match self {
            ImportOutcome::Imported(1) => "1 new task was imported successfully".to_string(),
            ImportOutcome::Imported(n) => format!("{n} new tasks were imported successfully"),
            ImportOutcome::Queued(_) => "You're trying to import a large amount of tasks, so please be patient. You will receive an email when the tasks are ready.".to_string(),
        }
    }
}

/// Rewrites a Google Docs spreadsheet link into its CSV export URL.
pub fn gdocs_csv_url(url: &str) -> String {
    const MARKER: &str = "/spreadsheets/d/";
    if let Some(start) = url.find(MARKER) {
        let rest = &url[start + MARKER.len()..];
        let key: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !key.is_empty() {
            return format!(
                "{}{MARKER}{key}/export?format=csv",
                &url[..start]
            );
        }
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}output=csv")
}

#[derive(Clone, Copy)]
enum Remote {
    File,
    Epicollect,
}

#[derive(Clone)]
pub struct ImporterService {
    client: reqwest::Client,
    epicollect_base_url: String,
}

impl Default for ImporterService {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ImporterService {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            epicollect_base_url: EPICOLLECT_BASE_URL.to_string(),
        }
    }

    pub fn with_epicollect_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.epicollect_base_url = base_url.into();
        self
    }

    async fn fetch(&self, url: &str, remote: Remote) -> Result<String, ImportError> {
        tracing::debug!("Fetching import source {}", url);
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::FORBIDDEN {
            return Err(match remote {
                Remote::File => ImportError::Forbidden,
                Remote::Epicollect => ImportError::EpicollectForbidden,
            });
        }
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));
        if is_html {
            return Err(match remote {
                Remote::File => ImportError::WrongFileType,
                Remote::Epicollect => ImportError::EpicollectWrongType,
            });
        }
        if !response.status().is_success() {
            return Err(ImportError::RemoteStatus(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Parsed and range-checked tasks from a source, before deduplication.
    pub async fn tasks_from(&self, source: &ImportSource) -> Result<Vec<CreateTask>, ImportError> {
        let tasks = self.parse_source(source).await?;
        for task in &tasks {
            task.validate()?;
        }
        Ok(tasks)
    }

    async fn parse_source(&self, source: &ImportSource) -> Result<Vec<CreateTask>, ImportError> {
        match source {
            ImportSource::Csv { csv_url } => {
                if csv_url.trim().is_empty() {
                    return Err(ImportError::MissingField("Please provide a CSV URL"));
                }
                tasks_from_csv(&self.fetch(csv_url, Remote::File).await?)
            }
            ImportSource::Gdocs { googledocs_url } => {
                if googledocs_url.trim().is_empty() {
                    return Err(ImportError::MissingField(
                        "Please provide a Google Docs spreadsheet URL",
                    ));
                }
                let url = gdocs_csv_url(googledocs_url);
                tasks_from_csv(&self.fetch(&url, Remote::File).await?)
            }
            ImportSource::Json { json_url } => {
                if json_url.trim().is_empty() {
                    return Err(ImportError::MissingField("Please provide a JSON URL"));
                }
                tasks_from_json(&self.fetch(json_url, Remote::File).await?)
            }
            ImportSource::Epicollect {
                epicollect_project,
                epicollect_form,
            } => {
                if epicollect_project.trim().is_empty() || epicollect_form.trim().is_empty() {
                    return Err(ImportError::MissingField(
                        "Please provide an EpiCollect Plus project and form",
                    ));
                }
                let url = format!(
                    "{}/{}/{}.json",
                    self.epicollect_base_url.trim_end_matches('/'),
                    epicollect_project,
                    epicollect_form
                );
                tasks_from_json(&self.fetch(&url, Remote::Epicollect).await?)
            }
            ImportSource::Upload { content } => tasks_from_csv(content),
        }
    }

    /// Imports from `source` into `project`. Batches larger than `max_sync`
    /// go to the job queue; `notify` receives a mail once they are stored.
    pub async fn import(
        &self,
        pool: &SqlitePool,
        project: &Project,
        source: &ImportSource,
        max_sync: usize,
        jobs: &JobQueue,
        notify: Option<String>,
    ) -> Result<ImportOutcome, ImportError> {
        let tasks = self.tasks_from(source).await?;
        if tasks.len() > max_sync {
            let n = tasks.len();
            tracing::info!(
                "Queueing import of {} tasks into project {}",
                n,
                project.short_name
            );
            jobs.enqueue(Job::ImportTasks {
                project_id: project.id,
                project_name: project.name.clone(),
                tasks,
                notify,
            })?;
            return Ok(ImportOutcome::Queued(n));
        }
        let n = store_new_tasks(pool, project.id, tasks).await?;
        Ok(ImportOutcome::Imported(n))
    }
}

/// Inserts the tasks whose `info` is not already present in the project,
/// including repeats inside the batch itself.
pub async fn store_new_tasks(
    pool: &SqlitePool,
    project_id: i64,
    tasks: Vec<CreateTask>,
) -> Result<usize, ImportError> {
    let mut seen: HashSet<String> = Task::infos_by_project(pool, project_id)
        .await?
        .iter()
        .map(canonical_key)
        .collect();
    let fresh: Vec<CreateTask> = tasks
        .into_iter()
        .filter(|task| seen.insert(canonical_key(&task.info)))
        .collect();
    if fresh.is_empty() {
        return Err(ImportError::NoNewRecords);
    }
    let inserted = Task::create_many(pool, project_id, &fresh).await?;
    tracing::info!("Imported {} tasks into project {}", inserted, project_id);
    Ok(inserted as usize)
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{StatusCode as AxumStatus, header},
        response::IntoResponse,
        routing::get,
    };
    use db::{
        DBService,
        models::{
            project::CreateProject,
            user::{CreateUser, User},
        },
    };
    use serde_json::json;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn project(pool: &SqlitePool) -> Project {
        let owner = User::create(
            pool,
            &CreateUser {
                name: "owner".into(),
                fullname: "Owner".into(),
                email_addr: "owner@example.com".into(),
                passwd_hash: None,
                info: None,
            },
        )
        .await
        .unwrap();
        Project::create(
            pool,
            &CreateProject {
                name: "Sample".into(),
                short_name: "sampleapp".into(),
                description: String::new(),
                long_description: String::new(),
                owner_id: owner.id,
                category_id: None,
                hidden: false,
                info: json!({}),
            },
        )
        .await
        .unwrap()
    }

    fn upload(content: &str) -> ImportSource {
        ImportSource::Upload {
            content: content.to_string(),
        }
    }

    #[test]
    fn gdocs_urls() {
        assert_eq!(
            gdocs_csv_url("https://docs.google.com/spreadsheets/d/abc_123/edit#gid=0"),
            "https://docs.google.com/spreadsheets/d/abc_123/export?format=csv"
        );
        assert_eq!(
            gdocs_csv_url("https://docs.google.com/spreadsheet/ccc?key=xyz"),
            "https://docs.google.com/spreadsheet/ccc?key=xyz&output=csv"
        );
        assert_eq!(
            gdocs_csv_url("http://drive.google.com"),
            "http://drive.google.com?output=csv"
        );
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(
            ImportOutcome::Imported(1).message(),
            "1 new task was imported successfully"
        );
        assert_eq!(
            ImportOutcome::Imported(3).message(),
            "3 new tasks were imported successfully"
        );
        assert!(ImportOutcome::Queued(301).message().contains("please be patient"));
    }

    #[tokio::test]
    async fn only_new_records_are_imported() {
        let db = DBService::new_in_memory().await.unwrap();
        let project = project(&db.pool).await;
        let (jobs, _rx) = JobQueue::new();
        let importer = ImporterService::default();

        let outcome = importer
            .import(&db.pool, &project, &upload("Foo,Bar,priority_0\n1,2,0.3"), 300, &jobs, None)
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(1));

        let outcome = importer
            .import(
                &db.pool,
                &project,
                &upload("Foo,Bar,priority_0\n1,2,0.3\n4,5,0.6"),
                300,
                &jobs,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Imported(1));
        let infos = Task::infos_by_project(&db.pool, project.id).await.unwrap();
        assert_eq!(
            infos,
            vec![json!({"Foo": "1", "Bar": "2"}), json!({"Foo": "4", "Bar": "5"})]
        );

        let err = importer
            .import(
                &db.pool,
                &project,
                &upload("Foo,Bar,priority_0\n1,2,0.3\n4,5,0.6"),
                300,
                &jobs,
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no new records"));
    }

    #[tokio::test]
    async fn out_of_range_task_fields_are_refused() {
        let db = DBService::new_in_memory().await.unwrap();
        let project = project(&db.pool).await;
        let (jobs, _rx) = JobQueue::new();
        let importer = ImporterService::default();

        let err = importer
            .import(&db.pool, &project, &upload("Foo,priority_0\n1,3"), 300, &jobs, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidTask(TaskFieldError::Priority)));
        // Queued batches are checked before they reach the queue.
        let err = importer
            .import(&db.pool, &project, &upload("Foo,n_answers\n1,0\n2,5"), 1, &jobs, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidTask(TaskFieldError::Redundancy)));
        assert_eq!(Task::count_by_project(&db.pool, project.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn large_batches_are_queued() {
        let db = DBService::new_in_memory().await.unwrap();
        let project = project(&db.pool).await;
        let (jobs, mut rx) = JobQueue::new();
        let content = (0..4).fold("n\n".to_string(), |acc, i| format!("{acc}{i}\n"));

        let outcome = ImporterService::default()
            .import(&db.pool, &project, &upload(&content), 3, &jobs, Some("owner@example.com".into()))
            .await
            .unwrap();
        assert_eq!(outcome, ImportOutcome::Queued(4));
        assert_eq!(Task::count_by_project(&db.pool, project.id).await.unwrap(), 0);
        match rx.recv().await.unwrap() {
            Job::ImportTasks { tasks, notify, .. } => {
                assert_eq!(tasks.len(), 4);
                assert_eq!(notify.as_deref(), Some("owner@example.com"));
            }
            other => panic!("unexpected job {other:?}"),
        }
    }

    #[tokio::test]
    async fn remote_errors_map_to_messages() {
        let router = Router::new()
            .route("/forbidden", get(|| async { AxumStatus::FORBIDDEN }))
            .route(
                "/html",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html/>").into_response() }),
            )
            .route("/csv", get(|| async { "Foo,Bar,Baz\n1,2,3" }))
            .route(
                "/fakeproject/fakeform.json",
                get(|| async {
                    ([(header::CONTENT_TYPE, "application/json")], r#"[{"DeviceID": 23}]"#)
                        .into_response()
                }),
            );
        let base = serve(router).await;
        let importer = ImporterService::default().with_epicollect_base_url(base.clone());

        let err = importer
            .tasks_from(&ImportSource::Csv {
                csv_url: format!("{base}/forbidden"),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Oops! It looks like you don't have permission to access that file"
        );

        let err = importer
            .tasks_from(&ImportSource::Csv {
                csv_url: format!("{base}/html"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Oops! That file doesn't look like the right file.");

        let tasks = importer
            .tasks_from(&ImportSource::Csv {
                csv_url: format!("{base}/csv"),
            })
            .await
            .unwrap();
        assert_eq!(tasks[0].info, json!({"Foo": "1", "Bar": "2", "Baz": "3"}));

        let tasks = importer
            .tasks_from(&ImportSource::Epicollect {
                epicollect_project: "fakeproject".into(),
                epicollect_form: "fakeform".into(),
            })
            .await
            .unwrap();
        assert_eq!(tasks[0].info, json!({"DeviceID": 23}));
    }
}
