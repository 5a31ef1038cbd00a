//! Signed, time-limited session tokens.
//!
//! Tokens are stateless HS256 JWTs: validity is a pure function of the
//! signature and the clock, with no server-side session table and no
//! revocation list. That trades revocability for zero-lookup validation.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{AppError, AppResult};

pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 48;

/// Claims carried by every session token. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject username.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_role() -> String {
    "user".to_string()
}

/// Token validation failures. Messages deliberately carry no signing detail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token rejected")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        let code = match e {
            TokenError::Invalid => "token_invalid",
            TokenError::Expired => "token_expired",
            TokenError::Malformed => "token_malformed",
        };
        AppError::auth(code, "invalid or expired session token")
    }
}

pub struct SessionTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_hours: i64,
}

impl SessionTokenService {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_hours,
        }
    }

    /// Issue a token for `username` expiring `ttl_hours` from now.
    pub fn issue(
        &self,
        username: &str,
        role: &str,
        email: Option<String>,
        workspace: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> AppResult<String> {
        let expires = Utc::now() + chrono::Duration::hours(self.ttl_hours);
        let claims = SessionClaims {
            sub: username.to_string(),
            exp: expires.timestamp(),
            workspace,
            email,
            role: role.to_string(),
            metadata,
        };
        debug!(username = %username, exp = claims.exp, "issuing session token");
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::internal("token_issue_failed".to_string(), e.to_string()))
    }

    /// Validate a token and return its claims. Pure computation over the
    /// secret and the token; no I/O.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed,
                _ => TokenError::Invalid,
            }),
        }
    }
}
