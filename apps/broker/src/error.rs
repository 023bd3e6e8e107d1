use broker_core::error::CoreError;

use common::ErrorLocation;

use thiserror::Error;

/// Errors that stop the broker binary from starting or shutting down.
#[derive(Debug, Error)]
pub enum BrokerAppError {
    /// Logger could not be set up
    #[error("Logger Error: {message} {location}")]
    Logger {
        message: String,
        location: ErrorLocation,
    },

    /// Environment problem before the broker is running
    #[error("Startup Error: {message} {location}")]
    Startup {
        message: String,
        location: ErrorLocation,
    },

    /// Error from broker-core (config, locator, relay, HTTP surface)
    #[error(transparent)]
    Core(#[from] CoreError),
}
