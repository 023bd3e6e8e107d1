use common::ErrorLocation;

use std::error::Error as StdError;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SupervisorError {
    #[error("Spawn Error: {message} {location}")]
    Spawn {
        message: String,
        location: ErrorLocation,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The host exited or closed stdout before completing its handshake.
    #[error("Startup Error: {message} (last output: {recent_output:?}) {location}")]
    Startup {
        message: String,
        recent_output: Vec<String>,
        location: ErrorLocation,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },

    #[error("Terminate Error: {message} {location}")]
    Terminate {
        message: String,
        location: ErrorLocation,
    },
}
