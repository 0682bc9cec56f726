use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::get,
};
use deployment::Deployment;
use services::services::stats::{self, GlobalStats, LeaderboardEntry};
use utils::response::ApiResponse;

use crate::{DeploymentImpl, error::ApiError};

const LEADERBOARD_SIZE: i64 = 20;

pub async fn global_stats(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<GlobalStats>>, ApiError> {
    let stats = stats::global_stats(&deployment.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(stats)))
}

pub async fn leaderboard(
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<LeaderboardEntry>>>, ApiError> {
    let entries = stats::leaderboard(&deployment.db().pool, LEADERBOARD_SIZE).await?;
    Ok(ResponseJson(ApiResponse::success(entries)))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new()
        .route("/stats", get(global_stats))
        .route("/leaderboard", get(leaderboard))
}
