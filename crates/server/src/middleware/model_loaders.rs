use std::collections::HashMap;

use axum::{
    Extension,
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use db::models::project::Project;
use deployment::Deployment;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

/// Loads the project named by the `short_name` path segment and applies the
/// hidden-project rules before the handler sees it.
pub async fn load_project_middleware(
    State(deployment): State<DeploymentImpl>,
    Path(params): Path<HashMap<String, String>>,
    Extension(identity): Extension<Identity>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(short_name) = params.get("short_name") else {
        return Err(ApiError::not_found());
    };
    let project = match Project::find_by_short_name(&deployment.db().pool, short_name).await? {
        Some(project) => project,
        None => {
            tracing::warn!("Project {} not found", short_name);
            return Err(ApiError::not_found());
        }
    };
    identity.check_visible(&project)?;

    request.extensions_mut().insert(project);
    Ok(next.run(request).await)
}
