//! Engine-host process supervision.
//!
//! The supervisor launches the host with the negotiated endpoint, waits for
//! its handshake line, forwards its output to the log, and reports exit on a
//! broadcast event stream. It does not speak the session protocol and never
//! restarts a crashed host.

pub mod handle;
pub mod log_sink;
pub mod process;

pub use handle::ProcessHandle;
pub use log_sink::{OutputStream, ProcessLogSink};

use crate::error::supervisor::SupervisorError;
use crate::transport::EndpointSpec;
use crate::{
    HOST_ENDPOINT_ENV, HOST_ENDPOINT_FLAG, HOST_HANDSHAKE_PATTERN, HOST_LOG_FOLDER_ENV,
    HOST_LOG_FOLDER_FLAG,
};

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child as TokioChild, ChildStdout, Command as TokioCommand};
use tokio::spawn as TokioSpawn;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::spawn_blocking;
use tokio::time::{Instant, timeout, timeout_at};

const EVENT_CAPACITY: usize = 64;
const ENDPOINT_CAPTURE: &str = "endpoint";
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Exit code reported when the platform gives none (killed by a signal).
pub const SIGNALLED_EXIT_CODE: i32 = -1;

static HANDSHAKE_REGEX: OnceLock<Regex> = OnceLock::new();

pub(crate) fn get_handshake_regex() -> &'static Regex {
    HANDSHAKE_REGEX.get_or_init(|| Regex::new(HOST_HANDSHAKE_PATTERN).expect("valid regex pattern"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Exited {
        handle_id: u64,
        pid: u32,
        exit_code: i32,
    },
}

pub struct ProcessSupervisor {
    events: broadcast::Sender<SupervisorEvent>,
    next_handle_id: AtomicU64,
    startup_timeout: Duration,
    log_folder: Option<PathBuf>,
}

pub(crate) fn build_launch_command(
    host_path: &Path,
    endpoint: &EndpointSpec,
    log_folder: Option<&Path>,
) -> TokioCommand {
    let endpoint = endpoint.to_string();
    let mut cmd = TokioCommand::new(host_path);
    cmd.arg(HOST_ENDPOINT_FLAG)
        .arg(&endpoint)
        .env(HOST_ENDPOINT_ENV, &endpoint);

    if let Some(folder) = log_folder {
        cmd.arg(HOST_LOG_FOLDER_FLAG)
            .arg(folder)
            .env(HOST_LOG_FOLDER_ENV, folder);
    }

    if let Some(dir) = host_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

impl ProcessSupervisor {
    pub fn new(startup_timeout: Duration, log_folder: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            next_handle_id: AtomicU64::new(1),
            startup_timeout,
            log_folder,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Launch the engine-host and wait for its `listening on <endpoint>` line.
    ///
    /// The returned handle carries the endpoint the host reported, which is
    /// the one to connect to.
    pub async fn launch(
        &self,
        host_path: &Path,
        endpoint: &EndpointSpec,
    ) -> Result<ProcessHandle, SupervisorError> {
        info!("Launching engine-host {} on {endpoint}", host_path.display());

        let mut child = build_launch_command(host_path, endpoint, self.log_folder.as_deref())
            .spawn()
            .map_err(|e| SupervisorError::Spawn {
                message: format!("Failed to spawn {}: {e}", host_path.display()),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(e),
            })?;

        let Some(pid) = child.id() else {
            return Err(SupervisorError::Startup {
                message: String::from("Process exited immediately after spawn"),
                recent_output: Vec::new(),
                location: ErrorLocation::from(Location::caller()),
            });
        };
        debug!("Spawned engine-host (PID: {pid})");

        let sink = Arc::new(ProcessLogSink::new(pid));

        if let Some(stderr) = child.stderr.take() {
            forward_lines(BufReader::new(stderr).lines(), OutputStream::Stderr, sink.clone());
        }

        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::Startup {
            message: String::from("Child process has no stdout"),
            recent_output: Vec::new(),
            location: ErrorLocation::from(Location::caller()),
        })?;
        let mut lines = BufReader::new(stdout).lines();

        let reported = match timeout(self.startup_timeout, wait_for_handshake(&mut lines, &sink))
            .await
        {
            Ok(Ok(reported)) => reported,
            Ok(Err(e)) => {
                kill_child(&mut child).await;
                return Err(e);
            }
            Err(_) => {
                warn!("Engine-host (PID: {pid}) did not complete handshake, killing it");
                kill_child(&mut child).await;
                return Err(SupervisorError::Timeout {
                    message: format!(
                        "Engine-host did not report its endpoint within {:?}",
                        self.startup_timeout
                    ),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        let endpoint = match EndpointSpec::parse(&reported) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Engine-host reported unparseable endpoint '{reported}': {e}");
                endpoint.clone()
            }
        };

        forward_lines(lines, OutputStream::Stdout, sink.clone());

        let handle_id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        watch_exit(child, handle_id, pid, kill_rx, exit_tx, self.events.clone());

        info!("Engine-host ready at {endpoint} (PID: {pid})");
        Ok(ProcessHandle::new(
            handle_id,
            pid,
            host_path.to_path_buf(),
            endpoint,
            exit_rx,
            kill_tx,
            sink,
        ))
    }

    /// Stop a host. Graceful asks the process to terminate (SIGTERM where
    /// available) and falls back to a kill if it is still alive afterwards.
    pub async fn terminate(
        &self,
        handle: &ProcessHandle,
        graceful: bool,
    ) -> Result<i32, SupervisorError> {
        if let Some(code) = handle.exit_code() {
            return Ok(code);
        }

        let pid = handle.pid();
        if graceful {
            debug!("Gracefully terminating engine-host (PID: {pid})");
            let stopped = spawn_blocking(move || process::stop_pid(pid))
                .await
                .unwrap_or(false);
            if stopped && let Some(code) = handle.wait_for_exit(KILL_WAIT).await {
                return Ok(code);
            }
            debug!("Graceful stop of PID {pid} did not finish, killing");
        }

        handle.request_kill();
        handle.wait_for_exit(KILL_WAIT).await.ok_or_else(|| SupervisorError::Terminate {
            message: format!("Engine-host (PID: {pid}) still running after kill"),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}

async fn wait_for_handshake(
    lines: &mut Lines<BufReader<ChildStdout>>,
    sink: &ProcessLogSink,
) -> Result<String, SupervisorError> {
    let re = get_handshake_regex();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                sink.record(OutputStream::Stdout, &line);
                if let Some(endpoint) = re
                    .captures(&line)
                    .and_then(|cap| cap.name(ENDPOINT_CAPTURE))
                {
                    return Ok(endpoint.as_str().to_string());
                }
            }
            Ok(None) => {
                return Err(SupervisorError::Startup {
                    message: String::from("Engine-host ended output before its handshake"),
                    recent_output: sink.recent(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            Err(e) => {
                return Err(SupervisorError::Startup {
                    message: format!("Failed to read engine-host output: {e}"),
                    recent_output: sink.recent(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }
    }
}

fn forward_lines<R>(mut lines: Lines<BufReader<R>>, stream: OutputStream, sink: Arc<ProcessLogSink>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    TokioSpawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            sink.record(stream, &line);
        }
    });
}

async fn kill_child(child: &mut TokioChild) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill engine-host: {e}");
    }
}

fn watch_exit(
    mut child: TokioChild,
    handle_id: u64,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
    events: broadcast::Sender<SupervisorEvent>,
) {
    TokioSpawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                debug!("Killing engine-host (PID: {pid})");
                if let Err(e) = child.start_kill() {
                    debug!("start_kill failed for PID {pid}: {e}");
                }
                let deadline = Instant::now() + KILL_WAIT;
                match timeout_at(deadline, child.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!("Engine-host (PID: {pid}) did not exit after kill");
                        child.wait().await
                    }
                }
            }
        };

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(SIGNALLED_EXIT_CODE),
            Err(e) => {
                warn!("Failed to wait for engine-host (PID: {pid}): {e}");
                SIGNALLED_EXIT_CODE
            }
        };

        if exit_code == 0 {
            info!("Engine-host (PID: {pid}) exited cleanly");
        } else {
            warn!("Engine-host (PID: {pid}) exited with code {exit_code}");
        }

        exit_tx.send_replace(Some(exit_code));
        let _ = events.send(SupervisorEvent::Exited {
            handle_id,
            pid,
            exit_code,
        });
    });
}
