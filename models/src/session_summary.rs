use crate::HostProcessInfo;

use serde::{Deserialize, Serialize};

/// One row of the broker's session listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub user: String,
    pub state: String,
    pub host: Option<HostProcessInfo>,
}
