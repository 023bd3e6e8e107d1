use crate::HOST_LOG_TARGET;

use std::collections::VecDeque;
use std::sync::Mutex;

use log::{info, warn};

const RECENT_OUTPUT_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives host output: every line goes to the log under `engine_host`,
/// the most recent ones are kept for diagnostics.
pub struct ProcessLogSink {
    pid: u32,
    capacity: usize,
    recent: Mutex<VecDeque<String>>,
}

impl ProcessLogSink {
    pub fn new(pid: u32) -> Self {
        Self::with_capacity(pid, RECENT_OUTPUT_LINES)
    }

    pub fn with_capacity(pid: u32, capacity: usize) -> Self {
        Self {
            pid,
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => info!(target: HOST_LOG_TARGET, "[{}] {line}", self.pid),
            OutputStream::Stderr => warn!(target: HOST_LOG_TARGET, "[{}] {line}", self.pid),
        }

        if self.capacity == 0 {
            return;
        }
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(line.to_string());
        }
    }

    pub fn recent(&self) -> Vec<String> {
        self.recent
            .lock()
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default()
    }
}
