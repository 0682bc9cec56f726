use db::models::user::User;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Token(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub name: String,
    pub admin: bool,
    pub exp: usize,
}

/// How an account was created. Third-party sign-ups leave their token in
/// the user's `info` and have no local password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum SignupMethod {
    Local,
    Facebook,
    Google,
    Twitter,
}

impl SignupMethod {
    pub fn label(self) -> &'static str {
        match self {
            SignupMethod::Local => "local",
            SignupMethod::Facebook => "Facebook",
            SignupMethod::Google => "Google",
            SignupMethod::Twitter => "Twitter",
        }
    }
}

pub fn signup_method(user: &User) -> SignupMethod {
    if user.info.get("facebook_token").is_some() {
        SignupMethod::Facebook
    } else if user.info.get("google_token").is_some() {
        SignupMethod::Google
    } else if user.info.get("twitter_token").is_some() {
        SignupMethod::Twitter
    } else {
        SignupMethod::Local
    }
}

#[derive(Clone)]
pub struct AuthService {
    secret: String,
    session_ttl_hours: i64,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(secret: impl Into<String>, session_ttl_hours: i64) -> Self {
        Self {
            secret: secret.into(),
            session_ttl_hours,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Lower bcrypt cost, for test deployments only.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        Ok(bcrypt::hash(password, self.bcrypt_cost)?)
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        Ok(bcrypt::verify(password, hash)?)
    }

    pub fn create_token(&self, user: &User) -> Result<String, AuthError> {
        let expiration = (chrono::Utc::now() + chrono::Duration::hours(self.session_ttl_hours))
            .timestamp()
            .max(0) as usize;
        let claims = Claims {
            sub: user.id,
            name: user.name.clone(),
            admin: user.admin,
            exp: expiration,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?)
    }

    pub fn decode_token(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn user(info: serde_json::Value) -> User {
        User {
            id: 7,
            name: "johndoe".into(),
            fullname: "John Doe".into(),
            email_addr: "johndoe@example.com".into(),
            passwd_hash: None,
            api_key: "key".into(),
            admin: false,
            ckan_api: None,
            info,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn signup_method_from_info() {
        assert_eq!(signup_method(&user(json!({}))), SignupMethod::Local);
        assert_eq!(
            signup_method(&user(json!({"twitter_token": {"oauth_token": "x"}}))),
            SignupMethod::Twitter
        );
        assert_eq!(
            signup_method(&user(json!({"facebook_token": "x"}))),
            SignupMethod::Facebook
        );
        assert_eq!(
            signup_method(&user(json!({"google_token": "x"}))),
            SignupMethod::Google
        );
    }

    #[test]
    fn passwords_verify() {
        let auth = AuthService::new("secret", 1).with_bcrypt_cost(4);
        let hash = auth.hash_password("p4ssw0rd").unwrap();
        assert!(auth.verify_password("p4ssw0rd", &hash).unwrap());
        assert!(!auth.verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn tokens_round_trip_and_check_secret() {
        let auth = AuthService::new("secret", 1);
        let token = auth.create_token(&user(json!({}))).unwrap();
        let claims = auth.decode_token(&token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.name, "johndoe");
        assert!(AuthService::new("other", 1).decode_token(&token).is_err());
    }
}
