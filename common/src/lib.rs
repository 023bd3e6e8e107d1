//! Shared primitives for the engine-host broker.
//!
//! Everything here is free of broker logic so that both `broker-core` and the
//! `broker` binary can depend on it:
//!
//! - [`ErrorLocation`]: call-site capture for every error variant
//! - [`HttpStatusCode`]: status classification for the relay and HTTP surface
//! - [`RedactedSecret`]: credential secrets that never reach logs

pub mod error;
pub mod http_status;
pub mod redacted_secret;

pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use http_status::HttpStatusCode;
pub use redacted_secret::RedactedSecret;

#[cfg(test)]
mod tests;
