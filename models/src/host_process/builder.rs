use crate::error::model_error::ModelError;
use crate::{ErrorLocation, HostProcessInfo};

use std::panic::Location;

/// Builder for validated [`HostProcessInfo`] values.
#[derive(Debug, Default)]
pub struct HostProcessInfoBuilder {
    pid: Option<u32>,
    endpoint: Option<String>,
    host_path: Option<String>,
    started_at: Option<u64>,
    exit_code: Option<i32>,
}

impl HostProcessInfoBuilder {
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_host_path(mut self, path: impl Into<String>) -> Self {
        self.host_path = Some(path.into());
        self
    }

    pub fn with_started_at(mut self, unix_secs: u64) -> Self {
        self.started_at = Some(unix_secs);
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    #[track_caller]
    pub fn build(self) -> Result<HostProcessInfo, ModelError> {
        let pid = self.pid.ok_or_else(|| ModelError::Validation {
            message: String::from("PID is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if pid == 0 {
            return Err(ModelError::Validation {
                message: String::from("PID must be non-zero"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let endpoint = self
            .endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ModelError::Validation {
                message: String::from("Endpoint is required"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let host_path = self
            .host_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ModelError::Validation {
                message: String::from("Host path is required"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        Ok(HostProcessInfo {
            pid,
            endpoint,
            host_path,
            started_at: self.started_at.unwrap_or_default(),
            exit_code: self.exit_code,
        })
    }
}
