use axum::response::Json;
use serde::Serialize;
use ts_rs::TS;
use utils::{response::ApiResponse, version::APP_VERSION};

#[derive(Debug, Serialize, TS)]
pub struct Health {
    pub status: String,
    pub version: String,
}

pub async fn health_check() -> Json<ApiResponse<Health>> {
    Json(ApiResponse::success(Health {
        status: "OK".to_string(),
        version: APP_VERSION.to_string(),
    }))
}
