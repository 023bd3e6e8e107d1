use crate::error::blob::BlobError;
use crate::error::protocol::ProtocolError;
use crate::error::transport::TransportError;
use crate::session::state::{SessionEvent, SessionState};

use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

/// Errors observed by callers of the session API.
#[derive(Debug, ThisError)]
pub enum SessionError {
    /// The session reached Stopping/Stopped/Faulted; nothing was sent.
    #[error("Session Terminated {location}")]
    SessionTerminated { location: ErrorLocation },

    #[error("Session Not Started: state is {state} {location}")]
    NotStarted {
        state: SessionState,
        location: ErrorLocation,
    },

    #[error("Request Cancelled: request {request_id} {location}")]
    Cancelled {
        request_id: u64,
        location: ErrorLocation,
    },

    /// The engine-host answered with an `Error` envelope.
    #[error("Host Error: request {request_id} '{name}': {message} {location}")]
    Remote {
        request_id: u64,
        name: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Transition: {event} from {from} {location}")]
    InvalidTransition {
        from: SessionState,
        event: SessionEvent,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl SessionError {
    #[track_caller]
    pub fn terminated() -> Self {
        SessionError::SessionTerminated {
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn cancelled(request_id: u64) -> Self {
        SessionError::Cancelled {
            request_id,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn not_started(state: SessionState) -> Self {
        SessionError::NotStarted {
            state,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionError::SessionTerminated { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Cancelled { .. })
    }
}
