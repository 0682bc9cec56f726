use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::category::{Category, CreateCategory, UpdateCategory};
use deployment::Deployment;
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

pub async fn get_categories(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Category>>>, ApiError> {
    let categories = Category::find_all(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(categories)))
}

pub async fn create_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<CreateCategory>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<Category>>), ApiError> {
    identity.admin()?;
    if payload.name.trim().is_empty() || payload.short_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Name and short name are required".to_string(),
        ));
    }
    let pool = &deployment.db().pool;
    if Category::find_by_short_name(pool, &payload.short_name)
        .await?
        .is_some()
    {
        return Err(ApiError::BadRequest(
            "A category with this short name already exists".to_string(),
        ));
    }
    let category = Category::create(pool, &payload).await?;
    tracing::info!("Category {} created", category.short_name);
    Ok((
        StatusCode::CREATED,
        ResponseJson(ApiResponse::success(category)),
    ))
}

pub async fn update_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCategory>,
) -> Result<ResponseJson<ApiResponse<Category>>, ApiError> {
    identity.admin()?;
    let category = Category::update(&deployment.db().pool, id, &payload)
        .await?
        .ok_or_else(ApiError::not_found)?;
    Ok(ResponseJson(ApiResponse::success(category)))
}

pub async fn delete_category(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    identity.admin()?;
    if Category::delete(&deployment.db().pool, id).await? == 0 {
        return Err(ApiError::not_found());
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new()
        .route("/categories", get(get_categories).post(create_category))
        .route(
            "/categories/{id}",
            put(update_category).delete(delete_category),
        )
}
