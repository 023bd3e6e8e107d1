use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Failures scoped to a single blob transfer.
#[derive(Debug, ThisError)]
pub enum BlobError {
    #[error("Blob Overflow: blob {blob_id} buffered {buffered} out-of-order chunks (limit {limit}) {location}")]
    Overflow {
        blob_id: u64,
        buffered: usize,
        limit: usize,
        location: ErrorLocation,
    },

    #[error("Blob Terminated: blob {blob_id} did not complete before the session ended {location}")]
    Terminated {
        blob_id: u64,
        location: ErrorLocation,
    },

    #[error("Blob Already Claimed: blob {blob_id} has another reader {location}")]
    AlreadyClaimed {
        blob_id: u64,
        location: ErrorLocation,
    },

    #[error("Blob Evicted: blob {blob_id} was discarded before anyone claimed it {location}")]
    Evicted {
        blob_id: u64,
        location: ErrorLocation,
    },

    #[error("Blob IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl BlobError {
    #[track_caller]
    pub fn terminated(blob_id: u64) -> Self {
        BlobError::Terminated {
            blob_id,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<IoError> for BlobError {
    #[track_caller]
    fn from(error: IoError) -> Self {
        BlobError::Io {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
