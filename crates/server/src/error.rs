use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{project::ProjectError, task::TaskFieldError};
use deployment::DeploymentError;
use services::services::{
    accounts::AccountError,
    auth::AuthError,
    config::ConfigError,
    exporter::ExportError,
    importer::ImportError,
    jobs::JobError,
    projects::ProjectServiceError,
    task_runs::SubmitError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    ProjectService(#[from] ProjectServiceError),
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    TaskField(#[from] TaskFieldError),
    #[error(transparent)]
    Queue(#[from] JobError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    UnsupportedMediaType(String),
}

impl ApiError {
    pub fn not_found() -> Self {
        ApiError::NotFound("Not found".to_string())
    }

    pub fn sign_in_required() -> Self {
        ApiError::Unauthorized("Please sign in to access this page".to_string())
    }

    pub fn forbidden() -> Self {
        ApiError::Forbidden("You do not have permission to do that".to_string())
    }

    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Project(e) => match e {
                ProjectError::ProjectNotFound => (StatusCode::NOT_FOUND, "ProjectError"),
                ProjectError::NameExists | ProjectError::ShortNameExists => {
                    (StatusCode::BAD_REQUEST, "ProjectError")
                }
                ProjectError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ProjectError"),
            },
            ApiError::ProjectService(e) => match e {
                ProjectServiceError::Project(inner) => match inner {
                    ProjectError::Database(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "ProjectError")
                    }
                    ProjectError::ProjectNotFound => (StatusCode::NOT_FOUND, "ProjectError"),
                    _ => (StatusCode::BAD_REQUEST, "ProjectError"),
                },
                ProjectServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
                ProjectServiceError::WrongPassword => (StatusCode::FORBIDDEN, "ProjectError"),
                ProjectServiceError::Database(_) | ProjectServiceError::Auth(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ProjectError")
                }
            },
            ApiError::Account(e) => match e {
                AccountError::Database(_) | AccountError::Auth(_) | AccountError::Queue(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "AccountError")
                }
                AccountError::NotRegistered | AccountError::IncorrectPassword => {
                    (StatusCode::UNAUTHORIZED, "AccountError")
                }
                AccountError::InvalidKey => (StatusCode::FORBIDDEN, "AccountError"),
                _ => (StatusCode::BAD_REQUEST, "AccountError"),
            },
            ApiError::Auth(e) => match e {
                AuthError::Token(_) => (StatusCode::UNAUTHORIZED, "AuthError"),
                AuthError::Hash(_) => (StatusCode::INTERNAL_SERVER_ERROR, "AuthError"),
            },
            ApiError::Import(e) => match e {
                ImportError::Database(_) | ImportError::Queue(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ImportError")
                }
                _ => (StatusCode::BAD_REQUEST, "ImportError"),
            },
            ApiError::Export(e) => match e {
                ExportError::NoTasks | ExportError::NoTaskRuns => {
                    (StatusCode::NOT_FOUND, "ExportError")
                }
                ExportError::CkanNotConfigured => (StatusCode::BAD_REQUEST, "ExportError"),
                ExportError::Ckan(_) => (StatusCode::BAD_GATEWAY, "ExportError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "ExportError"),
            },
            ApiError::TaskField(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            ApiError::Submit(e) => match e {
                SubmitError::TaskNotFound | SubmitError::WrongProject(_) => {
                    (StatusCode::NOT_FOUND, "TaskRunError")
                }
                SubmitError::SignInRequired => (StatusCode::UNAUTHORIZED, "TaskRunError"),
                SubmitError::AlreadyAnswered => (StatusCode::FORBIDDEN, "TaskRunError"),
                SubmitError::Database(_) | SubmitError::Queue(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "TaskRunError")
                }
            },
            ApiError::Queue(_) => (StatusCode::INTERNAL_SERVER_ERROR, "QueueError"),
            ApiError::Deployment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DeploymentError"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            ApiError::Json(_) => (StatusCode::INTERNAL_SERVER_ERROR, "JsonError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UnsupportedMediaType")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = self.status_and_type();

        // Client errors carry messages meant for the user; server errors
        // are logged and prefixed with their kind.
        let error_message = if status_code.is_server_error() {
            tracing::error!("{}: {}", error_type, self);
            format!("{}: {}", error_type, self)
        } else {
            self.to_string()
        };
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}
