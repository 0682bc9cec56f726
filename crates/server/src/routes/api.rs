//! Generic REST resources under `/api`. Every returned object carries its
//! hypermedia `link`/`links`, and incoming `link`/`links` keys are ignored.

use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    category::{self, Category, CreateCategory, UpdateCategory},
    filters::FieldFilter,
    project::{self, Project},
    task::{self, CreateTask, Task, UpdateTask},
    task_run::{self, TaskRun},
};
use deployment::Deployment;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use services::services::{
    hateoas::{ApiResource, Hateoas, remove_links},
    projects::{CreateProjectForm, UpdateProjectForm},
    scheduler::{self, SchedulerKind},
    task_runs,
};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

type ApiResult<T = Value> = Result<ResponseJson<ApiResponse<T>>, ApiError>;
type Created = Result<(StatusCode, ResponseJson<ApiResponse<Value>>), ApiError>;

/// `limit`/`offset` plus equality filters on the columns in `allowed`.
struct ListQuery {
    limit: i64,
    offset: i64,
    filters: Vec<FieldFilter>,
}

impl ListQuery {
    fn parse(params: &HashMap<String, String>, allowed: &[&'static str]) -> Result<Self, ApiError> {
        let number = |key: &str, default: i64| -> Result<i64, ApiError> {
            match params.get(key) {
                None => Ok(default),
                Some(raw) => raw
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n >= 0)
                    .ok_or_else(|| ApiError::BadRequest(format!("Invalid {key}: {raw}"))),
            }
        };
        Ok(Self {
            limit: number("limit", DEFAULT_LIMIT)?.min(MAX_LIMIT),
            offset: number("offset", 0)?,
            filters: FieldFilter::from_params(params, allowed),
        })
    }
}

fn linked<R: ApiResource + serde::Serialize>(hateoas: &Hateoas, item: &R) -> Result<Value, ApiError> {
    Ok(hateoas.with_links(item)?)
}

fn linked_all<R: ApiResource + serde::Serialize>(
    hateoas: &Hateoas,
    items: &[R],
) -> Result<Value, ApiError> {
    Ok(Value::Array(
        items
            .iter()
            .map(|item| hateoas.with_links(item))
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

/// Parses a request body after dropping any hypermedia keys the client echoed back.
fn body<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(remove_links(payload)).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn created(value: Value) -> Created {
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(value))))
}

async fn project_by_id(deployment: &DeploymentImpl, id: i64) -> Result<Project, ApiError> {
    Project::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or_else(ApiError::not_found)
}

/// Project `id`, provided the caller may see it.
async fn visible_project(
    deployment: &DeploymentImpl,
    identity: &Identity,
    id: i64,
) -> Result<Project, ApiError> {
    let project = project_by_id(deployment, id).await?;
    identity.check_visible(&project)?;
    Ok(project)
}

/// Project `id`, provided the caller owns it or is an admin.
async fn managed_project(
    deployment: &DeploymentImpl,
    identity: &Identity,
    id: i64,
) -> Result<Project, ApiError> {
    let project = project_by_id(deployment, id).await?;
    identity.manager_of(&project)?;
    Ok(project)
}

// Projects

pub async fn list_projects(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let query = ListQuery::parse(&params, project::FILTERABLE)?;
    let projects = Project::find_filtered(
        &deployment.db().pool,
        &query.filters,
        identity.viewer(),
        query.limit,
        query.offset,
    )
    .await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked_all(&hateoas, &projects)?)))
}

pub async fn get_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult {
    let project = visible_project(&deployment, &identity, id).await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &project)?)))
}

pub async fn create_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<Value>,
) -> Created {
    let owner = identity.user()?;
    let form: CreateProjectForm = body(payload)?;
    let project = deployment
        .projects()
        .create(&deployment.db().pool, owner, &form)
        .await?;
    let hateoas = deployment.hateoas().await;
    created(linked(&hateoas, &project)?)
}

/// Partial update: fields missing from the body keep their current value.
/// An `info` object replaces the stored one.
pub async fn update_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> ApiResult {
    let project = managed_project(&deployment, &identity, id).await?;
    let pool = &deployment.db().pool;

    let mut merged = json!({
        "name": project.name,
        "short_name": project.short_name,
        "description": project.description,
        "long_description": project.long_description,
        "category_id": project.category_id,
        "hidden": project.hidden,
        "allow_anonymous_contributors": project.allow_anonymous_contributors,
        "webhook": project.webhook,
    });
    let mut info = None;
    if let (Value::Object(target), Value::Object(source)) = (&mut merged, remove_links(payload)) {
        for (key, value) in source {
            if key == "info" {
                info = Some(value);
            } else if target.contains_key(&key) || key == "password" {
                target.insert(key, value);
            }
        }
    }
    let form: UpdateProjectForm = body(merged)?;
    let mut updated = deployment.projects().update(pool, &project, &form).await?;

    if let Some(info) = info {
        if !info.is_object() {
            return Err(ApiError::BadRequest("info must be an object".to_string()));
        }
        Project::update_info(pool, updated.id, &info).await?;
        updated.info = info;
    }
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &updated)?)))
}

pub async fn delete_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let project = managed_project(&deployment, &identity, id).await?;
    Project::delete(&deployment.db().pool, project.id).await?;
    tracing::info!("Project {} deleted through the API", project.short_name);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct OffsetQuery {
    #[serde(default)]
    pub offset: i64,
}

/// Next task for the caller, or `{}` when there is nothing left.
pub async fn project_new_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Query(query): Query<OffsetQuery>,
) -> ApiResult {
    let project = visible_project(&deployment, &identity, id).await?;
    let contributor = identity.contributor();
    if contributor.is_anonymous() && !project.allow_anonymous_contributors {
        return Err(task_runs::SubmitError::SignInRequired.into());
    }
    identity.ensure_unlocked(deployment.projects(), &project)?;

    let fallback = deployment.config().read().await.default_scheduler;
    let task = scheduler::new_task(
        &deployment.db().pool,
        &project,
        &contributor,
        SchedulerKind::for_project(&project, fallback),
        query.offset.max(0),
    )
    .await?;
    let value = match task {
        Some(task) => linked(&deployment.hateoas().await, &task)?,
        None => json!({}),
    };
    Ok(ResponseJson(ApiResponse::success(value)))
}

// Tasks

#[derive(Debug, Deserialize)]
pub struct ApiCreateTask {
    pub project_id: i64,
    #[serde(flatten)]
    pub task: CreateTask,
}

pub async fn list_tasks(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let query = ListQuery::parse(&params, task::FILTERABLE)?;
    let tasks = Task::find_filtered(
        &deployment.db().pool,
        &query.filters,
        identity.viewer(),
        query.limit,
        query.offset,
    )
    .await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked_all(&hateoas, &tasks)?)))
}

async fn task_by_id(deployment: &DeploymentImpl, id: i64) -> Result<Task, ApiError> {
    Task::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn get_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult {
    let task = task_by_id(&deployment, id).await?;
    visible_project(&deployment, &identity, task.project_id).await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &task)?)))
}

pub async fn create_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<Value>,
) -> Created {
    let data: ApiCreateTask = body(payload)?;
    let project = managed_project(&deployment, &identity, data.project_id).await?;
    data.task.validate()?;
    let task = Task::create(&deployment.db().pool, project.id, &data.task).await?;
    let hateoas = deployment.hateoas().await;
    created(linked(&hateoas, &task)?)
}

pub async fn update_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> ApiResult {
    let task = task_by_id(&deployment, id).await?;
    managed_project(&deployment, &identity, task.project_id).await?;
    let data: UpdateTask = body(payload)?;
    data.validate()?;
    let pool = &deployment.db().pool;
    let mut updated = Task::update(pool, task.id, &data)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if data.n_answers.is_some() && data.state.is_none() {
        updated.state = Task::refresh_state(pool, updated.id).await?;
    }
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &updated)?)))
}

pub async fn delete_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let task = task_by_id(&deployment, id).await?;
    managed_project(&deployment, &identity, task.project_id).await?;
    Task::delete(&deployment.db().pool, task.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Task runs

#[derive(Debug, Deserialize)]
pub struct ApiCreateTaskRun {
    pub project_id: i64,
    pub task_id: i64,
    #[serde(default)]
    pub info: Value,
}

pub async fn list_task_runs(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let query = ListQuery::parse(&params, task_run::FILTERABLE)?;
    let runs = TaskRun::find_filtered(
        &deployment.db().pool,
        &query.filters,
        identity.viewer(),
        query.limit,
        query.offset,
    )
    .await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked_all(&hateoas, &runs)?)))
}

async fn task_run_by_id(deployment: &DeploymentImpl, id: i64) -> Result<TaskRun, ApiError> {
    TaskRun::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or_else(ApiError::not_found)
}

/// The author of a task run, or an admin.
fn check_author(identity: &Identity, run: &TaskRun) -> Result<(), ApiError> {
    let user = identity.user()?;
    if user.admin || run.user_id == Some(user.id) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

pub async fn get_task_run(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult {
    let run = task_run_by_id(&deployment, id).await?;
    visible_project(&deployment, &identity, run.project_id).await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &run)?)))
}

/// Any contributor may answer; the submission rules live in the task-run service.
pub async fn create_task_run(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<Value>,
) -> Created {
    let data: ApiCreateTaskRun = body(payload)?;
    let project = visible_project(&deployment, &identity, data.project_id).await?;
    identity.ensure_unlocked(deployment.projects(), &project)?;
    let run = task_runs::submit(
        &deployment.db().pool,
        deployment.jobs(),
        &project,
        data.task_id,
        identity.contributor(),
        data.info,
    )
    .await?;
    let hateoas = deployment.hateoas().await;
    created(linked(&hateoas, &run)?)
}

#[derive(Debug, Deserialize)]
pub struct ApiUpdateTaskRun {
    pub info: Value,
}

pub async fn update_task_run(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> ApiResult {
    let run = task_run_by_id(&deployment, id).await?;
    check_author(&identity, &run)?;
    let data: ApiUpdateTaskRun = body(payload)?;
    let updated = TaskRun::update_info(&deployment.db().pool, run.id, &data.info)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &updated)?)))
}

pub async fn delete_task_run(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let run = task_run_by_id(&deployment, id).await?;
    check_author(&identity, &run)?;
    let pool = &deployment.db().pool;
    TaskRun::delete(pool, run.id).await?;
    Task::refresh_state(pool, run.task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Categories

pub async fn list_categories(
    State(deployment): State<DeploymentImpl>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let query = ListQuery::parse(&params, category::FILTERABLE)?;
    let categories =
        Category::find_filtered(&deployment.db().pool, &query.filters, query.limit, query.offset)
            .await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked_all(&hateoas, &categories)?)))
}

async fn category_by_id(deployment: &DeploymentImpl, id: i64) -> Result<Category, ApiError> {
    Category::find_by_id(&deployment.db().pool, id)
        .await?
        .ok_or_else(ApiError::not_found)
}

pub async fn get_category(
    State(deployment): State<DeploymentImpl>,
    Path(id): Path<i64>,
) -> ApiResult {
    let category = category_by_id(&deployment, id).await?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &category)?)))
}

pub async fn create_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<Value>,
) -> Created {
    identity.admin()?;
    let data: CreateCategory = body(payload)?;
    let pool = &deployment.db().pool;
    if Category::find_by_short_name(pool, &data.short_name).await?.is_some() {
        return Err(ApiError::BadRequest(
            "A category with this short name already exists".to_string(),
        ));
    }
    let category = Category::create(pool, &data).await?;
    let hateoas = deployment.hateoas().await;
    created(linked(&hateoas, &category)?)
}

pub async fn update_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> ApiResult {
    identity.admin()?;
    let data: UpdateCategory = body(payload)?;
    let category = Category::update(&deployment.db().pool, id, &data)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let hateoas = deployment.hateoas().await;
    Ok(ResponseJson(ApiResponse::success(linked(&hateoas, &category)?)))
}

pub async fn delete_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    identity.admin()?;
    if Category::delete(&deployment.db().pool, id).await? == 0 {
        return Err(ApiError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<DeploymentImpl> {
    let api_router = Router::new()
        .route("/project", get(list_projects).post(create_project))
        .route(
            "/project/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/project/{id}/newtask", get(project_new_task))
        .route("/task", get(list_tasks).post(create_task))
        .route(
            "/task/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/taskrun", get(list_task_runs).post(create_task_run))
        .route(
            "/taskrun/{id}",
            get(get_task_run).put(update_task_run).delete(delete_task_run),
        )
        .route("/category", get(list_categories).post(create_category))
        .route(
            "/category/{id}",
            get(get_category).put(update_category).delete(delete_category),
        );

    Router::new().nest("/api", api_router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_defaults_and_limits() {
        let params = HashMap::from([
            ("limit".to_string(), "500".to_string()),
            ("state".to_string(), "completed".to_string()),
            ("bogus".to_string(), "1".to_string()),
        ]);
        let query = ListQuery::parse(&params, task::FILTERABLE).unwrap();
        assert_eq!(query.limit, MAX_LIMIT);
        assert_eq!(query.offset, 0);
        assert_eq!(query.filters.len(), 1);
        assert_eq!(query.filters[0].column, "state");

        let defaults = ListQuery::parse(&HashMap::new(), task::FILTERABLE).unwrap();
        assert_eq!(defaults.limit, DEFAULT_LIMIT);

        let bad = HashMap::from([("offset".to_string(), "-1".to_string())]);
        assert!(ListQuery::parse(&bad, task::FILTERABLE).is_err());
    }
}
