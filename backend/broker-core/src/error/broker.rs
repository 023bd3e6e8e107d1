use crate::error::auth::AuthFailure;
use crate::error::locator::LocatorError;
use crate::error::session::SessionError;
use crate::error::supervisor::SupervisorError;
use crate::error::transport::TransportError;

use common::{ErrorLocation, HttpStatusCode};

use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum BrokerError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// No engine-host binary in any of the searched locations.
    #[error("Host Not Found: searched {searched:?} {location}")]
    HostNotFound {
        searched: Vec<PathBuf>,
        location: ErrorLocation,
    },

    #[error("Unknown Session: {id} {location}")]
    UnknownSession { id: String, location: ErrorLocation },

    #[error("Duplicate Session: {id} {location}")]
    DuplicateSession { id: String, location: ErrorLocation },

    /// The caller gave up while the host was starting.
    #[error("Start Cancelled: {id} {location}")]
    StartCancelled { id: String, location: ErrorLocation },
}

impl BrokerError {
    #[track_caller]
    pub fn unknown_session(id: impl Into<String>) -> Self {
        BrokerError::UnknownSession {
            id: id.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn start_cancelled(id: impl Into<String>) -> Self {
        BrokerError::StartCancelled {
            id: id.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Status the HTTP surface reports for this error.
    pub fn status_code(&self) -> HttpStatusCode {
        match self {
            BrokerError::Auth(failure) => failure.status_code(),
            BrokerError::UnknownSession { .. } => HttpStatusCode(404),
            BrokerError::DuplicateSession { .. } => HttpStatusCode(409),
            BrokerError::StartCancelled { .. } => HttpStatusCode(503),
            BrokerError::Session(SessionError::SessionTerminated { .. }) => HttpStatusCode(410),
            BrokerError::HostNotFound { .. } | BrokerError::Locator(_) => HttpStatusCode(500),
            BrokerError::Supervisor(SupervisorError::Timeout { .. }) => {
                HttpStatusCode::GATEWAY_TIMEOUT
            }
            BrokerError::Supervisor(_) | BrokerError::Transport(_) | BrokerError::Session(_) => {
                HttpStatusCode::BAD_GATEWAY
            }
        }
    }
}
