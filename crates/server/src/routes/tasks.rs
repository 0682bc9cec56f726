use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::{
    project::Project,
    task::{Task, TaskWithRunCount},
    task_run::TaskRun,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::{
    projects::{PriorityForm, ProjectService},
    scheduler::SchedulerKind,
    task_runs::SubmitError,
};
use strum::VariantNames;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::Identity,
    routes::{Page, PageQuery},
};

/// Fixed page size of the task browser.
const BROWSE_PER_PAGE: i64 = 10;

#[derive(Debug, Serialize, TS)]
pub struct BrowsedTask {
    #[serde(flatten)]
    #[ts(flatten)]
    pub task: TaskWithRunCount,
    pub pct_status: i64,
}

#[derive(Debug, Serialize, TS)]
pub struct TaskSettings {
    pub sched: SchedulerKind,
    pub schedulers: Vec<String>,
    pub n_tasks: i64,
}

#[derive(Debug, Deserialize, TS)]
pub struct SchedulerRequest {
    pub sched: SchedulerKind,
}

#[derive(Debug, Deserialize, TS)]
pub struct RedundancyRequest {
    pub n_answers: i64,
}

pub async fn browse_tasks(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Query(query): Query<PageQuery>,
) -> Result<ResponseJson<ApiResponse<Page<BrowsedTask>>>, ApiError> {
    identity.ensure_unlocked(deployment.projects(), &project)?;
    let pool = &deployment.db().pool;
    let total = Task::count_by_project(pool, project.id).await?;
    let offset = query.offset(BROWSE_PER_PAGE, total)?;
    let tasks = Task::find_by_project_id_with_run_count(pool, project.id, BROWSE_PER_PAGE, offset)
        .await?
        .into_iter()
        .map(|task| BrowsedTask {
            pct_status: task.pct_status(),
            task,
        })
        .collect();
    Ok(ResponseJson(ApiResponse::success(
        query.page(tasks, BROWSE_PER_PAGE, total),
    )))
}

async fn project_task(
    deployment: &DeploymentImpl,
    project: &Project,
    task_id: i64,
) -> Result<Task, ApiError> {
    match Task::find_by_id(&deployment.db().pool, task_id).await? {
        Some(task) if task.project_id == project.id => Ok(task),
        Some(_) => Err(SubmitError::WrongProject(project.short_name.clone()).into()),
        None => Err(SubmitError::TaskNotFound.into()),
    }
}

pub async fn get_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Path((_short_name, task_id)): Path<(String, i64)>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    identity.ensure_unlocked(deployment.projects(), &project)?;
    let task = project_task(&deployment, &project, task_id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn task_results(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Path((_short_name, task_id)): Path<(String, i64)>,
) -> Result<ResponseJson<ApiResponse<Vec<TaskRun>>>, ApiError> {
    identity.ensure_unlocked(deployment.projects(), &project)?;
    let task = project_task(&deployment, &project, task_id).await?;
    let runs = TaskRun::find_by_task_id(&deployment.db().pool, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(runs)))
}

pub async fn task_settings(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<TaskSettings>>, ApiError> {
    identity.manager_of(&project)?;
    let fallback = deployment.config().read().await.default_scheduler;
    Ok(ResponseJson(ApiResponse::success(TaskSettings {
        sched: SchedulerKind::for_project(&project, fallback),
        schedulers: SchedulerKind::VARIANTS.iter().map(|s| s.to_string()).collect(),
        n_tasks: Task::count_by_project(&deployment.db().pool, project.id).await?,
    })))
}

pub async fn set_scheduler(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Json(payload): Json<SchedulerRequest>,
) -> Result<ResponseJson<ApiResponse<SchedulerKind>>, ApiError> {
    identity.manager_of(&project)?;
    ProjectService::set_scheduler(&deployment.db().pool, &project, payload.sched).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        payload.sched,
        "Project Task Scheduler updated!",
    )))
}

pub async fn set_redundancy(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Json(payload): Json<RedundancyRequest>,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    identity.manager_of(&project)?;
    let updated =
        ProjectService::set_redundancy(&deployment.db().pool, &project, payload.n_answers).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        updated,
        "Redundancy of Tasks updated!",
    )))
}

pub async fn set_priority(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Json(payload): Json<PriorityForm>,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    identity.manager_of(&project)?;
    let updated = ProjectService::set_priority(&deployment.db().pool, &project, &payload).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        updated,
        "Tasks priority has been changed",
    )))
}

pub async fn delete_tasks(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    identity.manager_of(&project)?;
    let deleted = ProjectService::delete_all_tasks(&deployment.db().pool, &project).await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        deleted,
        "All the tasks and associated task runs have been deleted",
    )))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new()
        .route("/tasks", axum::routing::delete(delete_tasks))
        .route("/tasks/browse", get(browse_tasks))
        .route("/tasks/settings", get(task_settings))
        .route("/tasks/scheduler", put(set_scheduler))
        .route("/tasks/redundancy", put(set_redundancy))
        .route("/tasks/priority", put(set_priority))
        .route("/task/{task_id}", get(get_task))
        .route("/task/{task_id}/results", get(task_results))
}
