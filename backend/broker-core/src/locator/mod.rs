//! Broker and engine-host binary discovery.
//!
//! Search order per platform (first existing file wins):
//!
//! 1. Co-located with the running executable (primary platform only)
//! 2. IDE-embedded layout, relative "up" from the executable directory
//! 3. Packaged-runtime layout, relative "down" from the executable directory
//!
//! Not finding a binary is `None`; the broker decides whether that is an
//! installation error.

pub mod platform;

pub use platform::{Platform, PlatformLayout};

use crate::error::locator::LocatorError;

use common::ErrorLocation;

use std::env::current_exe;
use std::io::{Error as IoError, ErrorKind};
use std::panic::Location;
use std::path::{Path, PathBuf};

use log::{debug, trace};

#[derive(Debug, Clone)]
pub struct ExecutableLocator {
    base_dir: PathBuf,
    platform: Platform,
    host_override: Option<PathBuf>,
}

impl ExecutableLocator {
    pub fn new(base_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            base_dir: base_dir.into(),
            platform,
            host_override: None,
        }
    }

    /// Locator rooted at the directory of the running executable.
    #[track_caller]
    pub fn for_current_exe() -> Result<Self, LocatorError> {
        let exe = current_exe().map_err(|e| LocatorError::CurrentExe {
            message: format!("Failed to get current executable path: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(e),
        })?;

        let dir = exe.parent().ok_or_else(|| LocatorError::CurrentExe {
            message: format!("Executable has no parent directory: {}", exe.display()),
            location: ErrorLocation::from(Location::caller()),
            source: Box::new(IoError::new(ErrorKind::NotFound, "no parent dir")),
        })?;

        Ok(Self::new(dir, Platform::current()))
    }

    /// An explicitly configured host binary bypasses the search.
    pub fn with_host_override(mut self, host_path: Option<PathBuf>) -> Self {
        self.host_override = host_path;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn resolve_broker_path(&self) -> Option<PathBuf> {
        let layout = self.platform.layout();
        first_existing(self.candidates(layout.broker_binary))
    }

    pub fn resolve_host_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.host_override {
            debug!("Using configured host path {}", path.display());
            return path.is_file().then(|| path.clone());
        }

        let layout = self.platform.layout();
        first_existing(self.candidates(layout.host_binary))
    }

    /// Every location the host search would inspect, in order.
    pub fn host_search_paths(&self) -> Vec<PathBuf> {
        match &self.host_override {
            Some(path) => vec![path.clone()],
            None => self.candidates(self.platform.layout().host_binary),
        }
    }

    fn candidates(&self, binary: &str) -> Vec<PathBuf> {
        let layout = self.platform.layout();
        let mut paths = Vec::with_capacity(3);

        if layout.search_colocated {
            paths.push(self.base_dir.join(binary));
        }
        paths.push(join_relative(&self.base_dir, layout.embedded_dir).join(binary));
        paths.push(join_relative(&self.base_dir, layout.packaged_dir).join(binary));
        paths
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |path, segment| match segment {
            ".." => path.join(".."),
            other => path.join(other),
        })
}

fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    for candidate in candidates {
        trace!("Checking {}", candidate.display());
        if candidate.is_file() {
            debug!("Found binary at {}", candidate.display());
            return Some(candidate);
        }
    }
    None
}
