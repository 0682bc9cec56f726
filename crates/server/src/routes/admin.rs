use axum::{
    Extension, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::post,
};
use db::models::{project::Project, user::User};
use deployment::Deployment;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

async fn set_featured(
    deployment: &DeploymentImpl,
    identity: &Identity,
    project_id: i64,
    featured: bool,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    identity.admin()?;
    let pool = &deployment.db().pool;
    let project = Project::find_by_id(pool, project_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if project.featured == featured {
        return Err(ApiError::BadRequest(if featured {
            "Project is already featured".to_string()
        } else {
            "Project is not featured".to_string()
        }));
    }
    Project::set_featured(pool, project.id, featured).await?;
    tracing::info!("Project {} featured: {}", project.short_name, featured);
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn add_featured(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(project_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    set_featured(&deployment, &identity, project_id, true).await
}

pub async fn remove_featured(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(project_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    set_featured(&deployment, &identity, project_id, false).await
}

async fn set_admin(
    deployment: &DeploymentImpl,
    identity: &Identity,
    user_id: i64,
    admin: bool,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    identity.admin()?;
    let pool = &deployment.db().pool;
    let user = User::find_by_id(pool, user_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    User::set_admin(pool, user.id, admin).await?;
    tracing::info!("User {} admin: {}", user.name, admin);
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn grant_admin(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    set_admin(&deployment, &identity, user_id, true).await
}

pub async fn revoke_admin(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    set_admin(&deployment, &identity, user_id, false).await
}

pub fn router() -> Router<DeploymentImpl> {
    let admin_router = Router::new()
        .route(
            "/featured/{project_id}",
            post(add_featured).delete(remove_featured),
        )
        .route("/users/{user_id}/admin", post(grant_admin).delete(revoke_admin));

    Router::new().nest("/admin", admin_router)
}
