use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Connect Error: {endpoint}: {message} {location}")]
    Connect {
        endpoint: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Bind Error: {endpoint}: {message} {location}")]
    Bind {
        endpoint: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Endpoint: {endpoint}: {message} {location}")]
    InvalidEndpoint {
        endpoint: String,
        message: String,
        location: ErrorLocation,
    },

    /// Any read/write failure on an established channel.
    #[error("Transport Fault: {message} {location}")]
    Fault {
        message: String,
        location: ErrorLocation,
    },

    #[error("Channel Closed {location}")]
    Closed { location: ErrorLocation },
}

impl TransportError {
    #[track_caller]
    pub fn fault(message: impl Into<String>) -> Self {
        TransportError::Fault {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn closed() -> Self {
        TransportError::Closed {
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<IoError> for TransportError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        TransportError::fault(error.to_string())
    }
}

impl From<WsError> for TransportError {
    #[track_caller]
    fn from(error: WsError) -> Self {
        match error {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::closed(),
            other => TransportError::fault(other.to_string()),
        }
    }
}
