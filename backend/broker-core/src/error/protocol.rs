use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

/// A frame that cannot be trusted. The channel it came from is closed.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
    #[error("Malformed Frame: {message} {location}")]
    Malformed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Unknown Frame Tag: {tag:#04x} {location}")]
    UnknownFrameTag { tag: u8, location: ErrorLocation },

    #[error("Missing Correlation Id: message {id} '{name}' {location}")]
    MissingCorrelation {
        id: u64,
        name: String,
        location: ErrorLocation,
    },
}

impl ProtocolError {
    #[track_caller]
    pub fn malformed(message: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    #[track_caller]
    fn from(error: serde_json::Error) -> Self {
        ProtocolError::malformed(error.to_string())
    }
}
