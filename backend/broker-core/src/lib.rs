pub mod auth;
pub mod blob;
pub mod broker;
pub mod config;
pub mod error;
pub mod host;
pub mod locator;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod tests;

pub const HOST_ENDPOINT_FLAG: &str = "--endpoint";
pub const HOST_LOG_FOLDER_FLAG: &str = "--log-folder";
pub const HOST_ENDPOINT_ENV: &str = "RHOST_ENDPOINT";
pub const HOST_LOG_FOLDER_ENV: &str = "RHOST_LOG_FOLDER";

/// Log target for engine-host stdout/stderr lines.
pub const HOST_LOG_TARGET: &str = "engine_host";

/// Line an engine-host prints on stdout once it accepts connections.
pub const HOST_HANDSHAKE_PREFIX: &str = "listening on ";
pub const HOST_HANDSHAKE_PATTERN: &str =
    const_format::concatcp!("^", HOST_HANDSHAKE_PREFIX, r"(?P<endpoint>\S+)\s*$");
