pub mod auth;
pub mod blob;
pub mod broker;
pub mod config;
pub mod locator;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use auth::AuthFailure;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Auth(#[from] auth::AuthFailure),

    #[error(transparent)]
    Blob(#[from] blob::BlobError),

    #[error(transparent)]
    Broker(#[from] broker::BrokerError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Locator(#[from] locator::LocatorError),

    #[error(transparent)]
    Relay(#[from] relay::RelayError),

    #[error(transparent)]
    Session(#[from] session::SessionError),

    #[error(transparent)]
    Supervisor(#[from] supervisor::SupervisorError),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}
