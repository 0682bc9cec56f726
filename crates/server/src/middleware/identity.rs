use std::{collections::HashMap, net::SocketAddr};

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, Uri, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use db::models::{contributor::Contributor, filters::Viewer, project::Project, user::User};
use deployment::Deployment;
use services::services::projects::ProjectService;

use crate::{DeploymentImpl, error::ApiError};

pub const PROJECT_TOKEN_HEADER: &str = "x-project-token";
const FALLBACK_IP: &str = "127.0.0.1";

/// Who is making the request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: Option<User>,
    pub ip: String,
    /// Unlock token for password-protected projects.
    pub project_token: Option<String>,
}

impl Identity {
    pub fn contributor(&self) -> Contributor {
        match &self.user {
            Some(user) => Contributor::User(user.id),
            None => Contributor::Anonymous(self.ip.clone()),
        }
    }

    pub fn viewer(&self) -> Viewer {
        match &self.user {
            Some(user) if user.admin => Viewer::Admin,
            Some(user) => Viewer::User(user.id),
            None => Viewer::Anonymous,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.admin)
    }

    pub fn user(&self) -> Result<&User, ApiError> {
        self.user.as_ref().ok_or_else(ApiError::sign_in_required)
    }

    pub fn admin(&self) -> Result<&User, ApiError> {
        let user = self.user()?;
        if !user.admin {
            return Err(ApiError::forbidden());
        }
        Ok(user)
    }

    pub fn can_manage(&self, project: &Project) -> bool {
        self.user
            .as_ref()
            .is_some_and(|u| u.admin || project.is_owned_by(u.id))
    }

    /// Owner or admin of `project`; 401 for anonymous, 403 for anyone else.
    pub fn manager_of(&self, project: &Project) -> Result<&User, ApiError> {
        let user = self.user()?;
        if !self.can_manage(project) {
            return Err(ApiError::forbidden());
        }
        Ok(user)
    }

    /// Hidden projects are reserved for their owner and admins.
    pub fn check_visible(&self, project: &Project) -> Result<(), ApiError> {
        if !project.hidden || self.can_manage(project) {
            return Ok(());
        }
        match self.user {
            None => Err(ApiError::sign_in_required()),
            Some(_) => Err(ApiError::forbidden()),
        }
    }

    pub fn ensure_unlocked(
        &self,
        projects: &ProjectService,
        project: &Project,
    ) -> Result<(), ApiError> {
        if self.can_manage(project)
            || projects.is_unlocked(project, self.project_token.as_deref())
        {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "This project is password protected".to_string(),
            ))
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// The socket peer, or the proxy-supplied address when `trust_proxy` is set.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy && let Some(ip) = forwarded_ip(headers) {
        return ip;
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| FALLBACK_IP.to_string())
}

async fn authenticated_user(
    deployment: &DeploymentImpl,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Option<User>, ApiError> {
    let pool = &deployment.db().pool;

    if let Some(value) = headers.get(AUTHORIZATION) {
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Malformed Authorization header".to_string()))?;
        let claims = deployment.auth().decode_token(token.trim())?;
        return match User::find_by_id(pool, claims.sub).await? {
            Some(user) => Ok(Some(user)),
            None => Err(ApiError::Unauthorized("Unknown user".to_string())),
        };
    }

    let params = Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    match params.get("api_key") {
        Some(api_key) => match User::find_by_api_key(pool, api_key).await? {
            Some(user) => Ok(Some(user)),
            None => Err(ApiError::Unauthorized("Invalid api_key".to_string())),
        },
        None => Ok(None),
    }
}

/// Resolves the caller from a bearer token or an `api_key` query parameter
/// and stores an [`Identity`] in the request extensions.
pub async fn load_identity_middleware(
    State(deployment): State<DeploymentImpl>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let trust_proxy = deployment.config().read().await.trust_proxy;
    let user = authenticated_user(&deployment, &headers, &uri).await?;
    let identity = Identity {
        user,
        ip: client_ip(&headers, peer, trust_proxy),
        project_token: headers
            .get(PROJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn peer_address_unless_proxy_trusted() {
        let peer: SocketAddr = "198.51.100.4:53211".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None, false), "127.0.0.1");
        assert_eq!(client_ip(&headers, Some(peer), false), "198.51.100.4");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers, Some(peer), false), "198.51.100.4");
        assert_eq!(client_ip(&headers, Some(peer), true), "10.0.0.2");
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer), true), "203.0.113.7");
    }
}
