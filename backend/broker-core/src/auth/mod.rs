//! Caller authentication.
//!
//! A session is only created for callers that pass an [`Authenticator`].
//! Credentials are checked once and dropped; the broker keeps the resulting
//! [`AuthToken`] (see [`cache::AuthCache`]).

pub mod account;
pub mod cache;

pub use account::AccountAuthenticator;
pub use cache::AuthCache;

use crate::error::auth::AuthFailure;

use common::RedactedSecret;

use std::time::SystemTime;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;

const BASIC_SCHEME: &str = "Basic ";
const BEARER_SCHEME: &str = "Bearer ";

/// User name plus secret. The secret is redacted in output and zeroed on drop.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub secret: RedactedSecret,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: RedactedSecret::new(secret),
        }
    }

    /// Parse an HTTP `Authorization: Basic ...` header value.
    pub fn from_basic_header(value: &str) -> Option<Self> {
        let encoded = value.strip_prefix(BASIC_SCHEME)?.trim();
        let decoded = BASE64.decode(encoded).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, secret) = decoded.split_once(':')?;
        if user.is_empty() {
            return None;
        }
        Some(Self::new(user, secret))
    }

    /// `Basic ...` header value for these credentials.
    pub fn to_basic_header(&self) -> String {
        let raw = format!("{}:{}", self.user, self.secret.expose());
        format!("{BASIC_SCHEME}{}", BASE64.encode(raw))
    }
}

/// Proof of a successful authentication. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub id: Uuid,
    pub user: String,
    pub issued_at: SystemTime,
}

impl AuthToken {
    pub fn issue(user: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            issued_at: SystemTime::now(),
        }
    }

    /// `Bearer ...` header value referencing this token.
    pub fn to_bearer_header(&self) -> String {
        format!("{BEARER_SCHEME}{}", self.id)
    }

    pub fn parse_bearer_header(value: &str) -> Option<Uuid> {
        let id = value.strip_prefix(BEARER_SCHEME)?.trim();
        Uuid::parse_str(id).ok()
    }
}

/// Validates caller identity and policy. Must be side-effect free on failure.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, AuthFailure>;
}
