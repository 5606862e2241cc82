//! Session tokens.
//!
//! Tokens are HS256 JWTs carrying the user id and username. Credentials
//! themselves are checked elsewhere; this module only issues and verifies.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Auth errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Token is missing")]
    MissingToken,

    /// Token failed verification or has expired.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token could not be issued.
    #[error("Failed to issue token: {0}")]
    Issue(String),
}

/// Token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

/// A verified user, as bound to a request or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
        }
    }
}

/// Issues and verifies session tokens.
pub trait Auth: Send + Sync {
    /// Issue a token for a user.
    fn issue_token(&self, user_id: &str, username: &str) -> Result<String, AuthError>;

    /// Verify a token, returning its claims.
    fn verify_token(&self, token: &str) -> Result<Claims, AuthError>;

    /// Verify a token and return the identity it is bound to.
    fn identify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.verify_token(token).map(Identity::from)
    }
}

/// JWT-backed [`Auth`].
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtAuth {
    /// Create with the default token lifetime.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, Duration::hours(DEFAULT_TOKEN_TTL_HOURS))
    }

    /// Create with a custom token lifetime.
    #[must_use]
    pub fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }
}

impl Auth for JwtAuth {
    fn issue_token(&self, user_id: &str, username: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))
    }

    fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}
