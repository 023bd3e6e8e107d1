use crate::supervisor::{ProcessLogSink, SIGNALLED_EXIT_CODE};
use crate::transport::EndpointSpec;

use models::{HostProcessInfo, HostProcessInfoBuilder, ModelError};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{oneshot, watch};
use tokio::time::timeout;

/// A supervised engine-host process. Cheap to clone; the process is killed
/// when the last clone is dropped.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u64,
    pid: u32,
    host_path: PathBuf,
    endpoint: EndpointSpec,
    started_at: SystemTime,
    exit: watch::Receiver<Option<i32>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    sink: Arc<ProcessLogSink>,
}

impl ProcessHandle {
    pub(crate) fn new(
        id: u64,
        pid: u32,
        host_path: PathBuf,
        endpoint: EndpointSpec,
        exit: watch::Receiver<Option<i32>>,
        kill: oneshot::Sender<()>,
        sink: Arc<ProcessLogSink>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                pid,
                host_path,
                endpoint,
                started_at: SystemTime::now(),
                exit,
                kill: Mutex::new(Some(kill)),
                sink,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn host_path(&self) -> &Path {
        &self.inner.host_path
    }

    pub fn endpoint(&self) -> &EndpointSpec {
        &self.inner.endpoint
    }

    pub fn started_at(&self) -> SystemTime {
        self.inner.started_at
    }

    /// Set exactly once, when the process has been reaped.
    pub fn exit_code(&self) -> Option<i32> {
        *self.inner.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Last lines the host wrote to stdout/stderr.
    pub fn recent_output(&self) -> Vec<String> {
        self.inner.sink.recent()
    }

    pub async fn wait(&self) -> i32 {
        let mut exit = self.inner.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(code) => (*code).unwrap_or(SIGNALLED_EXIT_CODE),
            Err(_) => self.exit_code().unwrap_or(SIGNALLED_EXIT_CODE),
        }
    }

    /// `None` when the process is still running after `limit`.
    pub async fn wait_for_exit(&self, limit: Duration) -> Option<i32> {
        timeout(limit, self.wait()).await.ok()
    }

    pub(crate) fn request_kill(&self) {
        if let Ok(mut kill) = self.inner.kill.lock()
            && let Some(kill) = kill.take()
        {
            let _ = kill.send(());
        }
    }

    #[track_caller]
    pub fn info(&self) -> Result<HostProcessInfo, ModelError> {
        let started_at = self
            .inner
            .started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        HostProcessInfoBuilder::default()
            .with_pid(self.inner.pid)
            .with_endpoint(self.inner.endpoint.to_string())
            .with_host_path(self.inner.host_path.to_string_lossy())
            .with_started_at(started_at)
            .with_exit_code(self.exit_code())
            .build()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.inner.id)
            .field("pid", &self.inner.pid)
            .field("endpoint", &self.inner.endpoint)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}
