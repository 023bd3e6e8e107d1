//! Pure data shared between the broker core and its HTTP surface.
//!
//! No behavior lives here: the broker builds these values from live sessions
//! and supervised processes, and the HTTP layer serializes them.

pub mod error;
pub mod host_process;
pub mod session_summary;

pub use common::ErrorLocation;
pub use error::model_error::ModelError;
pub use host_process::HostProcessInfo;
pub use host_process::builder::HostProcessInfoBuilder;
pub use session_summary::SessionSummary;

#[cfg(test)]
mod tests;
