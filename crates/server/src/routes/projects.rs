use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    category::Category,
    project::{Project, ProjectError, ProjectSummary},
    user::{PublicUser, User},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::{
    projects::{
        CreateProjectForm, PRESENTER_TEMPLATES, UpdateProjectForm, presenter_template,
    },
    scheduler::{self, NextTask, SchedulerKind},
    stats::{self, ProjectStats},
    task_runs::SubmitError,
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::{Identity, load_project_middleware},
    routes::{Page, PageQuery, export, import, tasks},
};

#[derive(Debug, Serialize, TS)]
pub struct ProjectDetail {
    #[serde(flatten)]
    #[ts(flatten)]
    pub project: ProjectSummary,
    pub overall_progress: i64,
    pub needs_password: bool,
    pub owner: Option<PublicUser>,
}

#[derive(Debug, Serialize, TS)]
pub struct PresenterView {
    pub task_presenter: Option<String>,
    pub templates: Vec<String>,
}

#[derive(Debug, Deserialize, TS)]
pub struct PresenterRequest {
    pub task_presenter: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize, TS)]
pub struct UnlockResponse {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewTaskQuery {
    #[serde(default)]
    pub offset: i64,
}

pub async fn list_published(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<PageQuery>,
) -> Result<ResponseJson<ApiResponse<Page<ProjectSummary>>>, ApiError> {
    published_page(&deployment, None, &query).await
}

pub async fn list_category(
    State(deployment): State<DeploymentImpl>,
    Path(category): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<ResponseJson<ApiResponse<Page<ProjectSummary>>>, ApiError> {
    let category = Category::find_by_short_name(&deployment.db().pool, &category)
        .await?
        .ok_or_else(ApiError::not_found)?;
    published_page(&deployment, Some(category.id), &query).await
}

async fn published_page(
    deployment: &DeploymentImpl,
    category_id: Option<i64>,
    query: &PageQuery,
) -> Result<ResponseJson<ApiResponse<Page<ProjectSummary>>>, ApiError> {
    let pool = &deployment.db().pool;
    let per_page = deployment.config().read().await.per_page;
    let total = Project::count_published(pool, category_id).await?;
    let offset = query.offset(per_page, total)?;
    let projects = Project::find_published(pool, category_id, per_page, offset).await?;
    Ok(ResponseJson(ApiResponse::success(
        query.page(projects, per_page, total),
    )))
}

pub async fn list_featured(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectSummary>>>, ApiError> {
    let projects = Project::find_featured(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn list_drafts(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<PageQuery>,
) -> Result<ResponseJson<ApiResponse<Page<ProjectSummary>>>, ApiError> {
    identity.admin()?;
    let pool = &deployment.db().pool;
    let per_page = deployment.config().read().await.per_page;
    let total = Project::count_drafts(pool).await?;
    let offset = query.offset(per_page, total)?;
    let projects = Project::find_drafts(pool, per_page, offset).await?;
    Ok(ResponseJson(ApiResponse::success(
        query.page(projects, per_page, total),
    )))
}

pub async fn create_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateProjectForm>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<Project>>), ApiError> {
    let owner = identity.user()?;
    tracing::debug!("Creating project '{}'", payload.name);
    let project = deployment
        .projects()
        .create(&deployment.db().pool, owner, &payload)
        .await?;
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success_with_message(
            project,
            "Project created!",
        )),
    ))
}

pub async fn get_project(
    State(deployment): State<DeploymentImpl>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<ProjectDetail>>, ApiError> {
    let pool = &deployment.db().pool;
    let summary = Project::find_summary(pool, project.id)
        .await?
        .ok_or(ProjectError::ProjectNotFound)?;
    let owner = User::find_by_id(pool, project.owner_id)
        .await?
        .as_ref()
        .map(PublicUser::from);
    Ok(ResponseJson(ApiResponse::success(ProjectDetail {
        overall_progress: summary.overall_progress(),
        needs_password: project.needs_password(),
        owner,
        project: summary,
    })))
}

pub async fn update_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Json(payload): Json<UpdateProjectForm>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    identity.manager_of(&project)?;
    let updated = deployment
        .projects()
        .update(&deployment.db().pool, &project, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        updated,
        "Project updated!",
    )))
}

pub async fn delete_project(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    identity.manager_of(&project)?;
    if Project::delete(&deployment.db().pool, project.id).await? == 0 {
        return Err(ApiError::not_found());
    }
    tracing::info!("Project {} deleted", project.short_name);
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Project deleted!",
    )))
}

/// Owner view of the project, including its numeric id.
pub async fn project_settings(
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    identity.manager_of(&project)?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn get_presenter(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<PresenterView>>, ApiError> {
    identity.ensure_unlocked(deployment.projects(), &project)?;
    Ok(ResponseJson(ApiResponse::success(PresenterView {
        task_presenter: project.task_presenter().map(str::to_string),
        templates: PRESENTER_TEMPLATES.iter().map(|t| t.to_string()).collect(),
    })))
}

pub async fn set_presenter(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Json(payload): Json<PresenterRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    identity.manager_of(&project)?;
    services::services::projects::ProjectService::set_task_presenter(
        &deployment.db().pool,
        &project,
        &payload.task_presenter,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Your task presenter has been updated!",
    )))
}

pub async fn get_presenter_template(
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Path((_short_name, template)): Path<(String, String)>,
) -> Result<ResponseJson<ApiResponse<String>>, ApiError> {
    identity.manager_of(&project)?;
    let html = presenter_template(&template).ok_or_else(ApiError::not_found)?;
    Ok(ResponseJson(ApiResponse::success(html)))
}

pub async fn tutorial(
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<Option<String>>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(
        project.tutorial().map(str::to_string),
    )))
}

pub async fn unlock(
    State(deployment): State<DeploymentImpl>,
    Extension(project): Extension<Project>,
    Json(payload): Json<PasswordRequest>,
) -> Result<ResponseJson<ApiResponse<UnlockResponse>>, ApiError> {
    let token = deployment.projects().unlock(&project, &payload.password)?;
    Ok(ResponseJson(ApiResponse::success(UnlockResponse { token })))
}

/// Next task for the caller, or the tutorial on a first visit.
pub async fn new_task(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Extension(project): Extension<Project>,
    Query(query): Query<NewTaskQuery>,
) -> Result<ResponseJson<ApiResponse<NextTask>>, ApiError> {
    let contributor = identity.contributor();
    if contributor.is_anonymous() && !project.allow_anonymous_contributors {
        return Err(SubmitError::SignInRequired.into());
    }
    identity.ensure_unlocked(deployment.projects(), &project)?;

    let fallback = deployment.config().read().await.default_scheduler;
    let next = scheduler::next_for_contributor(
        &deployment.db().pool,
        &project,
        &contributor,
        fallback,
        query.offset.max(0),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(next)))
}

pub async fn project_stats(
    State(deployment): State<DeploymentImpl>,
    Extension(project): Extension<Project>,
) -> Result<ResponseJson<ApiResponse<ProjectStats>>, ApiError> {
    let stats = stats::project_stats(&deployment.db().pool, &project).await?;
    Ok(ResponseJson(ApiResponse::success(stats)))
}

pub async fn schedulers() -> ResponseJson<ApiResponse<Vec<String>>> {
    use strum::VariantNames;
    ResponseJson(ApiResponse::success(
        SchedulerKind::VARIANTS.iter().map(|s| s.to_string()).collect(),
    ))
}

pub fn router(deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    let project_router = Router::new()
        .route(
            "/",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/settings", get(project_settings))
        .route("/tasks/presenter", get(get_presenter).put(set_presenter))
        .route(
            "/tasks/presenter/templates/{template}",
            get(get_presenter_template),
        )
        .route("/tutorial", get(tutorial))
        .route("/password", post(unlock))
        .route("/newtask", get(new_task))
        .route("/stats", get(project_stats))
        .merge(tasks::router())
        .merge(import::router())
        .merge(export::router())
        .layer(from_fn_with_state(
            deployment.clone(),
            load_project_middleware,
        ));

    let projects_router = Router::new()
        .route("/", get(list_published).post(create_project))
        .route("/schedulers", get(schedulers))
        .route("/category/featured", get(list_featured))
        .route("/category/draft", get(list_drafts))
        .route("/category/{category}", get(list_category))
        .nest("/{short_name}", project_router);

    Router::new().nest("/projects", projects_router)
}
