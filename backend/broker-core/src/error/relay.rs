use common::{ErrorLocation, HttpStatusCode};

use std::panic::Location;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum RelayError {
    #[error("Invalid Relay Request: {message} {location}")]
    InvalidRequest {
        message: String,
        location: ErrorLocation,
    },

    /// The outbound leg failed; reported to the front end as `status`.
    #[error("Outbound Relay Error: HTTP {status} - {message} {location}")]
    Outbound {
        message: String,
        status: HttpStatusCode,
        location: ErrorLocation,
    },
}

impl RelayError {
    #[track_caller]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        RelayError::InvalidRequest {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Categorize an outbound reqwest failure before it is stringified.
    #[track_caller]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let status = if error.is_timeout() {
            HttpStatusCode::GATEWAY_TIMEOUT
        } else {
            HttpStatusCode::BAD_GATEWAY
        };

        RelayError::Outbound {
            message: error.to_string(),
            status,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    pub fn status_code(&self) -> HttpStatusCode {
        match self {
            RelayError::InvalidRequest { .. } => HttpStatusCode::BAD_REQUEST,
            RelayError::Outbound { status, .. } => *status,
        }
    }
}
