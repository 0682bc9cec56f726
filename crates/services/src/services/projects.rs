//! Project creation and the owner-facing settings: details, presenter,
//! password, scheduler, redundancy and priority.

use chrono::Duration;
use db::models::{
    category::Category,
    project::{CreateProject, Project, ProjectError, UpdateProject},
    task::{Task, check_n_answers, check_priority},
    user::User,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;
use utils::{
    signer::Signer,
    text::{DESCRIPTION_MAX_LEN, description_from_long_description, is_valid_short_name},
};

use crate::services::{
    auth::{AuthError, AuthService},
    scheduler::SchedulerKind,
    webhook::WebhookService,
};

pub const PROJECT_PASSWORD_SALT: &str = "project-password";

/// Named starting points for a task presenter.
pub const PRESENTER_TEMPLATES: &[&str] = &["basic", "image", "sound", "video", "map", "pdf"];

#[derive(Debug, Error)]
pub enum ProjectServiceError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{0}")]
    Validation(String),
    #[error("Sorry, wrong password")]
    WrongPassword,
}

impl ProjectServiceError {
    fn invalid(message: impl Into<String>) -> Self {
        ProjectServiceError::Validation(message.into())
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateProjectForm {
    pub name: String,
    pub short_name: String,
    pub long_description: String,
    pub category_id: Option<i64>,
    #[serde(default)]
    pub hidden: bool,
    #[ts(type = "Record<string, unknown> | null")]
    pub info: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct UpdateProjectForm {
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub long_description: String,
    pub category_id: Option<i64>,
    pub hidden: bool,
    pub allow_anonymous_contributors: bool,
    /// Empty string removes the webhook.
    pub webhook: Option<String>,
    /// Empty string removes the password.
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct PriorityForm {
    /// Comma separated task ids, e.g. `1,2,3`.
    pub task_ids: String,
    pub priority_0: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnlockKey {
    project_id: i64,
}

fn required(value: &str, field: &str) -> Result<(), ProjectServiceError> {
    if value.trim().is_empty() {
        Err(ProjectServiceError::invalid(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn check_short_name(short_name: &str) -> Result<(), ProjectServiceError> {
    if is_valid_short_name(short_name) {
        Ok(())
    } else {
        Err(ProjectServiceError::invalid(
            "$#&\\/| and space symbols are forbidden",
        ))
    }
}

/// Parses `1,2,3`. Spaces or anything but integers are rejected.
pub fn parse_task_ids(task_ids: &str) -> Result<Vec<i64>, ProjectServiceError> {
    task_ids
        .split(',')
        .map(|id| {
            id.parse::<i64>().map_err(|_| {
                ProjectServiceError::invalid(
                    "Task IDs must be comma separated integers, without spaces",
                )
            })
        })
        .collect()
}

/// HTML skeleton for one of [`PRESENTER_TEMPLATES`].
pub fn presenter_template(name: &str) -> Option<String> {
    let media = match name {
        "basic" => r#"<p id="question"></p>"#,
        "image" => r#"<img id="task-image" class="img-fluid" src="" alt="task image"/>"#,
        "sound" => r#"<audio id="task-sound" controls src=""></audio>"#,
        "video" => r#"<video id="task-video" controls src=""></video>"#,
        "map" => r#"<div id="task-map" style="height: 400px"></div>"#,
        "pdf" => r#"<iframe id="task-pdf" src="" width="100%" height="600"></iframe>"#,
        _ => return None,
    };
    Some(format!(
        r#"<div class="task-presenter" data-template="{name}">
  {media}
  <div id="answer">
    <button class="btn-answer" value="yes">Yes</button>
    <button class="btn-answer" value="no">No</button>
  </div>
</div>
"#
    ))
}

#[derive(Clone)]
pub struct ProjectService {
    auth: AuthService,
    signer: Signer,
    webhooks: WebhookService,
}

impl ProjectService {
    pub fn new(auth: AuthService, signer: Signer, webhooks: WebhookService) -> Self {
        Self {
            auth,
            signer,
            webhooks,
        }
    }

    pub async fn create(
        &self,
        pool: &SqlitePool,
        owner: &User,
        form: &CreateProjectForm,
    ) -> Result<Project, ProjectServiceError> {
        required(&form.name, "Name")?;
        required(&form.short_name, "Short name")?;
        required(&form.long_description, "Long description")?;
        check_short_name(&form.short_name)?;

        let category_id = match form.category_id {
            Some(id) => Category::find_by_id(pool, id)
                .await?
                .ok_or_else(|| ProjectServiceError::invalid("Unknown category"))?
                .id,
            None => Category::ensure_default(pool).await?.id,
        };
        let info = match &form.info {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(_) => return Err(ProjectServiceError::invalid("info must be an object")),
            None => json!({}),
        };

        let project = Project::create(
            pool,
            &CreateProject {
                name: form.name.trim().to_string(),
                short_name: form.short_name.clone(),
                description: description_from_long_description(&form.long_description),
                long_description: form.long_description.clone(),
                owner_id: owner.id,
                category_id: Some(category_id),
                hidden: form.hidden,
                info,
            },
        )
        .await?;
        tracing::info!("Project {} created by {}", project.short_name, owner.name);
        Ok(project)
    }

    /// Applies the settings form. `info` is left untouched; a new webhook is
    /// only stored when it answers a GET with 200.
    pub async fn update(
        &self,
        pool: &SqlitePool,
        project: &Project,
        form: &UpdateProjectForm,
    ) -> Result<Project, ProjectServiceError> {
        required(&form.name, "Name")?;
        required(&form.short_name, "Short name")?;
        required(&form.description, "Description")?;
        check_short_name(&form.short_name)?;
        if form.description.chars().count() > DESCRIPTION_MAX_LEN {
            return Err(ProjectServiceError::invalid(format!(
                "Field cannot be longer than {DESCRIPTION_MAX_LEN} characters."
            )));
        }
        if let Some(id) = form.category_id
            && Category::find_by_id(pool, id).await?.is_none()
        {
            return Err(ProjectServiceError::invalid("Unknown category"));
        }

        let webhook = match form.webhook.as_deref().map(str::trim) {
            None => project.webhook.clone(),
            Some("") => None,
            Some(url) if project.webhook.as_deref() == Some(url) => project.webhook.clone(),
            Some(url) => {
                if self.webhooks.is_reachable(url).await {
                    Some(url.to_string())
                } else {
                    tracing::info!(
                        "Keeping previous webhook of {}: {} did not answer 200",
                        project.short_name,
                        url
                    );
                    project.webhook.clone()
                }
            }
        };

        let mut data = UpdateProject::from_project(project);
        data.name = form.name.trim().to_string();
        data.short_name = form.short_name.clone();
        data.description = form.description.clone();
        data.long_description = form.long_description.clone();
        data.category_id = form.category_id.or(project.category_id);
        data.hidden = form.hidden;
        data.allow_anonymous_contributors = form.allow_anonymous_contributors;
        data.webhook = webhook;
        let updated = Project::update(pool, project.id, &data).await?;

        match form.password.as_deref() {
            None => Ok(updated),
            Some(password) => {
                self.set_password(pool, &updated, password).await?;
                Ok(Project::find_by_id(pool, updated.id)
                    .await?
                    .ok_or(ProjectError::ProjectNotFound)?)
            }
        }
    }

    pub async fn set_password(
        &self,
        pool: &SqlitePool,
        project: &Project,
        password: &str,
    ) -> Result<(), ProjectServiceError> {
        if password.is_empty() {
            Project::set_password(pool, project.id, None).await?;
            tracing::debug!("Password of {} cleared", project.short_name);
        } else {
            let hash = self.auth.hash_password(password)?;
            Project::set_password(pool, project.id, Some(&hash)).await?;
        }
        Ok(())
    }

    /// Checks the project password and hands out an unlock token.
    pub fn unlock(&self, project: &Project, password: &str) -> Result<String, ProjectServiceError> {
        let Some(hash) = project.passwd_hash.as_deref() else {
            return self.unlock_token(project);
        };
        if !self.auth.verify_password(password, hash)? {
            return Err(ProjectServiceError::WrongPassword);
        }
        self.unlock_token(project)
    }

    fn unlock_token(&self, project: &Project) -> Result<String, ProjectServiceError> {
        self.signer
            .dumps(
                &UnlockKey {
                    project_id: project.id,
                },
                PROJECT_PASSWORD_SALT,
            )
            .map_err(|e| ProjectServiceError::invalid(e.to_string()))
    }

    /// Whether `token` unlocks this project for the next day.
    pub fn is_unlocked(&self, project: &Project, token: Option<&str>) -> bool {
        if !project.needs_password() {
            return true;
        }
        let Some(token) = token else {
            return false;
        };
        self.signer
            .loads::<UnlockKey>(token, PROJECT_PASSWORD_SALT, Some(Duration::days(1)))
            .map(|key| key.project_id == project.id)
            .unwrap_or(false)
    }

    pub async fn set_task_presenter(
        pool: &SqlitePool,
        project: &Project,
        html: &str,
    ) -> Result<Value, ProjectServiceError> {
        Self::set_info_key(pool, project, "task_presenter", json!(html)).await
    }

    pub async fn set_scheduler(
        pool: &SqlitePool,
        project: &Project,
        kind: SchedulerKind,
    ) -> Result<Value, ProjectServiceError> {
        Self::set_info_key(pool, project, "sched", json!(kind.to_string())).await
    }

    async fn set_info_key(
        pool: &SqlitePool,
        project: &Project,
        key: &str,
        value: Value,
    ) -> Result<Value, ProjectServiceError> {
        let mut info = match &project.info {
            Value::Object(map) => map.clone(),
            _ => Default::default(),
        };
        info.insert(key.to_string(), value);
        let info = Value::Object(info);
        Project::update_info(pool, project.id, &info).await?;
        Ok(info)
    }

    /// Sets `n_answers` on every task and recomputes their states.
    pub async fn set_redundancy(
        pool: &SqlitePool,
        project: &Project,
        n_answers: i64,
    ) -> Result<u64, ProjectServiceError> {
        check_n_answers(n_answers).map_err(|e| ProjectServiceError::invalid(e.to_string()))?;
        let updated = Task::set_n_answers_for_project(pool, project.id, n_answers).await?;
        tracing::info!(
            "Redundancy of {} set to {} on {} tasks",
            project.short_name,
            n_answers,
            updated
        );
        Ok(updated)
    }

    pub async fn set_priority(
        pool: &SqlitePool,
        project: &Project,
        form: &PriorityForm,
    ) -> Result<u64, ProjectServiceError> {
        let ids = parse_task_ids(&form.task_ids)?;
        check_priority(form.priority_0).map_err(|e| ProjectServiceError::invalid(e.to_string()))?;
        Ok(Task::set_priority(pool, project.id, &ids, form.priority_0).await?)
    }

    pub async fn delete_all_tasks(
        pool: &SqlitePool,
        project: &Project,
    ) -> Result<u64, ProjectServiceError> {
        let deleted = Task::delete_by_project(pool, project.id).await?;
        tracing::info!("Deleted {} tasks of {}", deleted, project.short_name);
        Ok(deleted)
    }
}
