use std::net::SocketAddr;

use axum::{
    Router, extract::connect_info::IntoMakeServiceWithConnectInfo,
    middleware::from_fn_with_state, routing::get,
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{DeploymentImpl, error::ApiError, middleware::load_identity_middleware};

pub mod account;
pub mod admin;
pub mod api;
pub mod categories;
pub mod export;
pub mod health;
pub mod import;
pub mod projects;
pub mod stats;
pub mod tasks;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

/// One page of a listing.
#[derive(Debug, Serialize, TS)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl PageQuery {
    /// Offset of the requested page. Pages start at 1; a page past the last
    /// one is a 404, except the first page of an empty listing.
    pub fn offset(&self, per_page: i64, total: i64) -> Result<i64, ApiError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ApiError::not_found());
        }
        let offset = (page - 1) * per_page;
        if page > 1 && offset >= total {
            return Err(ApiError::not_found());
        }
        Ok(offset)
    }

    pub fn page<T>(&self, items: Vec<T>, per_page: i64, total: i64) -> Page<T> {
        Page {
            items,
            page: self.page.unwrap_or(1),
            per_page,
            total,
        }
    }
}

/// Served with the peer address so anonymous contributors are told apart.
pub fn router(
    deployment: DeploymentImpl,
) -> IntoMakeServiceWithConnectInfo<Router, SocketAddr> {
    app(deployment).into_make_service_with_connect_info::<SocketAddr>()
}

/// The full route tree with state applied.
pub fn app(deployment: DeploymentImpl) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(account::router())
        .merge(admin::router())
        .merge(categories::router())
        .merge(stats::router())
        .merge(projects::router(&deployment))
        .merge(api::router())
        .layer(from_fn_with_state(
            deployment.clone(),
            load_identity_middleware,
        ))
        .with_state(deployment)
}
