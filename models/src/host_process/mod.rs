pub mod builder;

use serde::{Deserialize, Serialize};

/// Snapshot of a supervised engine-host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProcessInfo {
    pub pid: u32,
    pub endpoint: String,
    pub host_path: String,
    /// Seconds since the Unix epoch.
    pub started_at: u64,
    pub exit_code: Option<i32>,
}
