//! Account lifecycle: registration (optionally confirmed by mail), sign-in,
//! password changes and resets.

use chrono::Duration;
use db::models::user::{CreateUser, UpdateProfile, User};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;
use utils::signer::{Signer, SignerError};

use crate::services::{
    auth::{AuthError, AuthService, SignupMethod, signup_method},
    config::Config,
    jobs::{Job, JobError, JobQueue},
    mail::Mail,
};

pub const ACCOUNT_VALIDATION_SALT: &str = "account-validation";
pub const PASSWORD_RESET_SALT: &str = "password-reset";

fn key_max_age() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Queue(#[from] JobError),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("Passwords must match")]
    PasswordMismatch,
    #[error("The user name is already taken")]
    NameTaken,
    #[error("Email is already taken")]
    EmailTaken,
    #[error("Ooops, we didn't find you in the system, did you sign up?")]
    NotRegistered,
    #[error("Ooops, Incorrect email/password")]
    IncorrectPassword,
    #[error("Your current password doesn't match the one in our records")]
    WrongCurrentPassword,
    #[error(
        "We don't have this email in our records. You may have signed up with a different email or used Twitter, Facebook, or Google to sign-in"
    )]
    UnknownEmail,
    #[error("This link is not valid anymore")]
    InvalidKey,
}

impl From<SignerError> for AccountError {
    fn from(e: SignerError) -> Self {
        tracing::debug!("Rejected signed key: {}", e);
        AccountError::InvalidKey
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct RegisterForm {
    pub fullname: String,
    pub name: String,
    pub email_addr: String,
    pub password: String,
    pub confirm: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct SigninForm {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct ChangePasswordForm {
    pub current_password: String,
    pub new_password: String,
    pub confirm: String,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct ResetPasswordForm {
    pub key: String,
    pub new_password: String,
    pub confirm: String,
}

/// Account data carried by the confirmation key until the address is verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingAccount {
    fullname: String,
    name: String,
    email_addr: String,
    passwd_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResetKey {
    user: String,
    password: String,
}

#[derive(Debug)]
pub enum Registration {
    Created { user: User, token: String },
    ConfirmationSent,
}

#[derive(Clone)]
pub struct AccountService {
    auth: AuthService,
    signer: Signer,
    jobs: JobQueue,
}

fn required(value: &str, field: &'static str) -> Result<(), AccountError> {
    if value.trim().is_empty() {
        Err(AccountError::MissingField(field))
    } else {
        Ok(())
    }
}

fn check_new_password(password: &str, confirm: &str) -> Result<(), AccountError> {
    required(password, "Password")?;
    if password != confirm {
        return Err(AccountError::PasswordMismatch);
    }
    Ok(())
}

impl AccountService {
    pub fn new(auth: AuthService, signer: Signer, jobs: JobQueue) -> Self {
        Self { auth, signer, jobs }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    async fn ensure_available(
        pool: &SqlitePool,
        name: &str,
        email_addr: &str,
        except_id: Option<i64>,
    ) -> Result<(), AccountError> {
        if let Some(user) = User::find_by_name(pool, name).await?
            && Some(user.id) != except_id
        {
            return Err(AccountError::NameTaken);
        }
        if let Some(user) = User::find_by_email(pool, email_addr).await?
            && Some(user.id) != except_id
        {
            return Err(AccountError::EmailTaken);
        }
        Ok(())
    }

    pub async fn register(
        &self,
        pool: &SqlitePool,
        config: &Config,
        form: &RegisterForm,
    ) -> Result<Registration, AccountError> {
        required(&form.fullname, "Full name")?;
        required(&form.name, "User name")?;
        required(&form.email_addr, "Email")?;
        check_new_password(&form.password, &form.confirm)?;
        Self::ensure_available(pool, &form.name, &form.email_addr, None).await?;

        let passwd_hash = self.auth.hash_password(&form.password)?;
        if config.account_validation {
            let key = self.signer.dumps(
                &PendingAccount {
                    fullname: form.fullname.clone(),
                    name: form.name.clone(),
                    email_addr: form.email_addr.clone(),
                    passwd_hash,
                },
                ACCOUNT_VALIDATION_SALT,
            )?;
            let link = config.url_for(&format!("account/register/confirmation?key={key}"));
            self.jobs.enqueue(Job::SendMail(Mail::to(
                form.email_addr.clone(),
                "Welcome! Please confirm your account",
                format!("Hello {},\n\nConfirm your account here: {link}\n", form.fullname),
            )))?;
            tracing::info!("Confirmation mail queued for {}", form.name);
            return Ok(Registration::ConfirmationSent);
        }

        let user = User::create(
            pool,
            &CreateUser {
                name: form.name.clone(),
                fullname: form.fullname.clone(),
                email_addr: form.email_addr.clone(),
                passwd_hash: Some(passwd_hash),
                info: None,
            },
        )
        .await?;
        tracing::info!("Registered user {}", user.name);
        let token = self.auth.create_token(&user)?;
        Ok(Registration::Created { user, token })
    }

    /// Creates the account carried by a confirmation key.
    pub async fn confirm(&self, pool: &SqlitePool, key: &str) -> Result<(User, String), AccountError> {
        let pending: PendingAccount =
            self.signer
                .loads(key, ACCOUNT_VALIDATION_SALT, Some(key_max_age()))?;
        Self::ensure_available(pool, &pending.name, &pending.email_addr, None).await?;
        let user = User::create(
            pool,
            &CreateUser {
                name: pending.name,
                fullname: pending.fullname,
                email_addr: pending.email_addr,
                passwd_hash: Some(pending.passwd_hash),
                info: None,
            },
        )
        .await?;
        let token = self.auth.create_token(&user)?;
        Ok((user, token))
    }

    pub async fn signin(
        &self,
        pool: &SqlitePool,
        form: &SigninForm,
    ) -> Result<(User, String), AccountError> {
        let user = User::find_by_email(pool, &form.email)
            .await?
            .ok_or(AccountError::NotRegistered)?;
        let Some(hash) = user.passwd_hash.as_deref() else {
            return Err(AccountError::NotRegistered);
        };
        if !self.auth.verify_password(&form.password, hash)? {
            return Err(AccountError::IncorrectPassword);
        }
        let token = self.auth.create_token(&user)?;
        tracing::debug!("User {} signed in", user.name);
        Ok((user, token))
    }

    pub async fn update_profile(
        &self,
        pool: &SqlitePool,
        user: &User,
        form: &UpdateProfile,
    ) -> Result<User, AccountError> {
        required(&form.fullname, "Full name")?;
        required(&form.name, "User name")?;
        required(&form.email_addr, "Email")?;
        Self::ensure_available(pool, &form.name, &form.email_addr, Some(user.id)).await?;
        Ok(User::update_profile(pool, user.id, form).await?)
    }

    pub async fn change_password(
        &self,
        pool: &SqlitePool,
        user: &User,
        form: &ChangePasswordForm,
    ) -> Result<(), AccountError> {
        let matches = match user.passwd_hash.as_deref() {
            Some(hash) => self.auth.verify_password(&form.current_password, hash)?,
            None => false,
        };
        if !matches {
            return Err(AccountError::WrongCurrentPassword);
        }
        check_new_password(&form.new_password, &form.confirm)?;
        let hash = self.auth.hash_password(&form.new_password)?;
        User::update_password(pool, user.id, &hash).await?;
        Ok(())
    }

    /// Mails a reset link, or a reminder of the third-party account the user
    /// signed up with.
    pub async fn forgot_password(
        &self,
        pool: &SqlitePool,
        config: &Config,
        email: &str,
    ) -> Result<(), AccountError> {
        let user = User::find_by_email(pool, email)
            .await?
            .ok_or(AccountError::UnknownEmail)?;

        let body = match (signup_method(&user), user.passwd_hash.as_deref()) {
            (SignupMethod::Local, Some(hash)) => {
                let key = self.signer.dumps(
                    &ResetKey {
                        user: user.name.clone(),
                        password: hash.to_string(),
                    },
                    PASSWORD_RESET_SALT,
                )?;
                let link = config.url_for(&format!("account/reset-password?key={key}"));
                format!("Hello {},\n\nReset your password here: {link}\n", user.fullname)
            }
            (SignupMethod::Local, None) => return Err(AccountError::NotRegistered),
            (method, _) => format!(
                "Hello {},\n\nYou signed up with your {} account. Please sign in with {} again.\n",
                user.fullname,
                method.label(),
                method.label()
            ),
        };
        self.jobs.enqueue(Job::SendMail(Mail::to(
            user.email_addr.clone(),
            "Account Recovery",
            body,
        )))?;
        Ok(())
    }

    pub async fn reset_password(
        &self,
        pool: &SqlitePool,
        form: &ResetPasswordForm,
    ) -> Result<User, AccountError> {
        if form.key.is_empty() {
            return Err(AccountError::InvalidKey);
        }
        let key: ResetKey = self
            .signer
            .loads(&form.key, PASSWORD_RESET_SALT, Some(key_max_age()))?;
        let user = User::find_by_name(pool, &key.user)
            .await?
            .ok_or(AccountError::InvalidKey)?;
        if user.passwd_hash.as_deref() != Some(key.password.as_str()) {
            return Err(AccountError::InvalidKey);
        }
        check_new_password(&form.new_password, &form.confirm)?;
        let hash = self.auth.hash_password(&form.new_password)?;
        User::update_password(pool, user.id, &hash).await?;
        tracing::info!("Password reset for {}", user.name);
        Ok(user)
    }
}
