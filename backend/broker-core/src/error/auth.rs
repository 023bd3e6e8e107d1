//! Authentication failures.
//!
//! Every variant is terminal for the attempt: no process is launched and no
//! session is created.

use common::{ErrorLocation, HttpStatusCode};

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, Clone, ThisError)]
pub enum AuthFailure {
    #[error("Invalid Credentials: user '{user}' {location}")]
    InvalidCredentials {
        user: String,
        location: ErrorLocation,
    },

    #[error("Policy Denied: user '{user}': {reason} {location}")]
    PolicyDenied {
        user: String,
        reason: String,
        location: ErrorLocation,
    },

    #[error("Credentials Expired: user '{user}' {location}")]
    Expired {
        user: String,
        location: ErrorLocation,
    },
}

impl AuthFailure {
    #[track_caller]
    pub fn invalid_credentials(user: impl Into<String>) -> Self {
        AuthFailure::InvalidCredentials {
            user: user.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn policy_denied(user: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthFailure::PolicyDenied {
            user: user.into(),
            reason: reason.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn expired(user: impl Into<String>) -> Self {
        AuthFailure::Expired {
            user: user.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Stable reason code, safe to return to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials { .. } => "invalid_credentials",
            AuthFailure::PolicyDenied { .. } => "policy_denied",
            AuthFailure::Expired { .. } => "expired",
        }
    }

    pub fn status_code(&self) -> HttpStatusCode {
        match self {
            AuthFailure::InvalidCredentials { .. } | AuthFailure::Expired { .. } => {
                HttpStatusCode(401)
            }
            AuthFailure::PolicyDenied { .. } => HttpStatusCode(403),
        }
    }

    pub fn user(&self) -> &str {
        match self {
            AuthFailure::InvalidCredentials { user, .. }
            | AuthFailure::PolicyDenied { user, .. }
            | AuthFailure::Expired { user, .. } => user,
        }
    }
}
