//! Timestamped, salted HMAC signatures for keys handed out by mail
//! (account confirmation, password reset) and for project unlock tokens.
//!
//! Token layout: `{payload}.{issued_at}.{signature}`, all base64url without
//! padding. The signature covers the salt, the payload part and the
//! timestamp part, so a key minted for one purpose never validates for
//! another.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Serialize, de::DeserializeOwned};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const MAX_TOKEN_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("malformed signed key")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("signed key expired")]
    Expired,
    #[error("invalid payload: {0}")]
    Payload(String),
}

#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    pub fn dumps<T: Serialize>(&self, value: &T, salt: &str) -> Result<String, SignerError> {
        let payload =
            serde_json::to_vec(value).map_err(|e| SignerError::Payload(e.to_string()))?;
        let payload_part = URL_SAFE_NO_PAD.encode(payload);
        let ts_part = URL_SAFE_NO_PAD.encode(Utc::now().timestamp().to_be_bytes());
        let sig_part = URL_SAFE_NO_PAD.encode(self.mac(salt, &payload_part, &ts_part)?);
        Ok(format!("{payload_part}.{ts_part}.{sig_part}"))
    }

    pub fn loads<T: DeserializeOwned>(
        &self,
        token: &str,
        salt: &str,
        max_age: Option<Duration>,
    ) -> Result<T, SignerError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(SignerError::Malformed);
        }
        let parts: Vec<&str> = token.split('.').collect();
        let &[payload_part, ts_part, sig_part] = parts.as_slice() else {
            return Err(SignerError::Malformed);
        };

        let expected = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| SignerError::Malformed)?;
        let mut mac = self.keyed(salt)?;
        mac.update(payload_part.as_bytes());
        mac.update(b".");
        mac.update(ts_part.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| SignerError::BadSignature)?;

        if let Some(max_age) = max_age {
            let ts_bytes: [u8; 8] = URL_SAFE_NO_PAD
                .decode(ts_part)
                .map_err(|_| SignerError::Malformed)?
                .try_into()
                .map_err(|_| SignerError::Malformed)?;
            let issued_at = i64::from_be_bytes(ts_bytes);
            if Utc::now().timestamp() - issued_at > max_age.num_seconds() {
                return Err(SignerError::Expired);
            }
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_part)
            .map_err(|_| SignerError::Malformed)?;
        serde_json::from_slice(&payload).map_err(|e| SignerError::Payload(e.to_string()))
    }

    fn keyed(&self, salt: &str) -> Result<HmacSha256, SignerError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SignerError::Payload(e.to_string()))?;
        mac.update(salt.as_bytes());
        mac.update(b"signer");
        Ok(mac)
    }

    fn mac(&self, salt: &str, payload_part: &str, ts_part: &str) -> Result<Vec<u8>, SignerError> {
        let mut mac = self.keyed(salt)?;
        mac.update(payload_part.as_bytes());
        mac.update(b".");
        mac.update(ts_part.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
