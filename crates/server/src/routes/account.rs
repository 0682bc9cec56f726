use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post, put},
};
use db::models::{
    project::Project,
    task_run::TaskRun,
    user::{PublicUser, UpdateProfile, User},
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use services::services::{
    accounts::{
        ChangePasswordForm, RegisterForm, Registration, ResetPasswordForm, SigninForm,
    },
    auth::{SignupMethod, signup_method},
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    DeploymentImpl,
    error::ApiError,
    middleware::Identity,
    routes::{Page, PageQuery},
};

/// A signed-in user together with their session token.
#[derive(Debug, Serialize, TS)]
pub struct Session {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, TS)]
pub struct Profile {
    pub user: PublicUser,
    pub signup_method: SignupMethod,
    pub n_task_runs: i64,
    pub projects_created: Vec<Project>,
    pub projects_contributed: Vec<Project>,
}

#[derive(Debug, Deserialize, TS)]
pub struct ForgotPasswordRequest {
    pub email_addr: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct CkanApiRequest {
    pub ckan_api: Option<String>,
}

pub async fn register(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<RegisterForm>,
) -> Result<ResponseJson<ApiResponse<Option<Session>>>, ApiError> {
    let config = deployment.config().read().await.clone();
    match deployment
        .accounts()
        .register(&deployment.db().pool, &config, &payload)
        .await?
    {
        Registration::Created { user, token } => Ok(ResponseJson(
            ApiResponse::success_with_message(
                Some(Session { user, token }),
                "Thanks for signing-up",
            ),
        )),
        Registration::ConfirmationSent => Ok(ResponseJson(ApiResponse::success_with_message(
            None,
            "Use the link in the email we sent you to confirm your account",
        ))),
    }
}

pub async fn confirm_account(
    State(deployment): State<DeploymentImpl>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let Some(key) = params.get("key") else {
        return Err(ApiError::Forbidden("Missing confirmation key".to_string()));
    };
    let (user, token) = deployment
        .accounts()
        .confirm(&deployment.db().pool, key)
        .await?;
    Ok(ResponseJson(ApiResponse::success(Session { user, token })))
}

pub async fn signin(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<SigninForm>,
) -> Result<ResponseJson<ApiResponse<Session>>, ApiError> {
    let (user, token) = deployment
        .accounts()
        .signin(&deployment.db().pool, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        Session { user, token },
        "Welcome back",
    )))
}

/// Sessions are bearer tokens, so signing out is the client dropping its token.
pub async fn signout() -> ResponseJson<ApiResponse<()>> {
    ResponseJson(ApiResponse::success_with_message((), "You are now signed out"))
}

pub async fn list_users(
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<PageQuery>,
) -> Result<ResponseJson<ApiResponse<Page<PublicUser>>>, ApiError> {
    let pool = &deployment.db().pool;
    let per_page = deployment.config().read().await.per_page;
    let total = User::count(pool).await?;
    let offset = query.offset(per_page, total)?;
    let users = User::list(pool, per_page, offset)
        .await?
        .iter()
        .map(PublicUser::from)
        .collect();
    Ok(ResponseJson(ApiResponse::success(
        query.page(users, per_page, total),
    )))
}

pub async fn current_user(
    Extension(identity): Extension<Identity>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(identity.user()?.clone())))
}

async fn find_user(deployment: &DeploymentImpl, name: &str) -> Result<User, ApiError> {
    User::find_by_name(&deployment.db().pool, name)
        .await?
        .ok_or_else(ApiError::not_found)
}

/// The named account, which must belong to the caller.
async fn own_account(
    deployment: &DeploymentImpl,
    identity: &Identity,
    name: &str,
) -> Result<User, ApiError> {
    let user = find_user(deployment, name).await?;
    let me = identity.user()?;
    if me.id != user.id {
        return Err(ApiError::forbidden());
    }
    Ok(user)
}

pub async fn profile(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<ResponseJson<ApiResponse<Profile>>, ApiError> {
    let pool = &deployment.db().pool;
    let user = find_user(&deployment, &name).await?;
    let viewing_self = identity.user.as_ref().is_some_and(|me| me.id == user.id);
    let projects_created = Project::find_by_owner(pool, user.id)
        .await?
        .into_iter()
        .filter(|p| !p.hidden || viewing_self || identity.is_admin())
        .collect();
    Ok(ResponseJson(ApiResponse::success(Profile {
        signup_method: signup_method(&user),
        n_task_runs: TaskRun::count_by_user(pool, user.id).await?,
        projects_created,
        projects_contributed: Project::find_contributed_by(pool, user.id).await?,
        user: PublicUser::from(&user),
    })))
}

pub async fn update_profile(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(payload): Json<UpdateProfile>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = own_account(&deployment, &identity, &name).await?;
    let updated = deployment
        .accounts()
        .update_profile(&deployment.db().pool, &user, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        updated,
        "Your profile has been updated!",
    )))
}

pub async fn change_password(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(payload): Json<ChangePasswordForm>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let user = own_account(&deployment, &identity, &name).await?;
    deployment
        .accounts()
        .change_password(&deployment.db().pool, &user, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "Yay, you changed your password succesfully!",
    )))
}

pub async fn reset_api_key(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<ResponseJson<ApiResponse<String>>, ApiError> {
    let user = own_account(&deployment, &identity, &name).await?;
    let api_key = User::reset_api_key(&deployment.db().pool, user.id).await?;
    tracing::info!("API key of {} reset", user.name);
    Ok(ResponseJson(ApiResponse::success_with_message(
        api_key,
        "New API-KEY generated",
    )))
}

pub async fn set_ckan_api(
    State(deployment): State<DeploymentImpl>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
    Json(payload): Json<CkanApiRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let user = own_account(&deployment, &identity, &name).await?;
    let ckan_api = payload.ckan_api.as_deref().filter(|k| !k.trim().is_empty());
    User::update_ckan_api(&deployment.db().pool, user.id, ckan_api).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn forgot_password(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let config = deployment.config().read().await.clone();
    deployment
        .accounts()
        .forgot_password(&deployment.db().pool, &config, &payload.email_addr)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "We've send you email with account recovery instructions!",
    )))
}

pub async fn reset_password(
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<ResetPasswordForm>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    deployment
        .accounts()
        .reset_password(&deployment.db().pool, &payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success_with_message(
        (),
        "You reset your password successfully!",
    )))
}

pub fn router() -> Router<DeploymentImpl> {
    let account_router = Router::new()
        .route("/", get(list_users))
        .route("/register", post(register))
        .route("/register/confirmation", get(confirm_account))
        .route("/signin", post(signin))
        .route("/signout", post(signout))
        .route("/profile", get(current_user))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/{name}", get(profile))
        .route("/{name}/update", put(update_profile))
        .route("/{name}/password", post(change_password))
        .route("/{name}/resetapikey", post(reset_api_key))
        .route("/{name}/ckan", put(set_ckan_api));

    Router::new().nest("/account", account_router)
}
