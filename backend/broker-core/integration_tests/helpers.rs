//! Shared fixtures for broker integration tests.
//!
//! - Broker construction with one test account
//! - A shell script standing in for the engine-host binary (unix only)
//! - An in-process stub host serving the session protocol

use broker_core::auth::{AccountAuthenticator, Credentials};
use broker_core::blob::BlobSettings;
use broker_core::broker::Broker;
use broker_core::config::{AccountConfig, BrokerConfig};
use broker_core::host::{HostConnection, HostEvent};
use broker_core::locator::{ExecutableLocator, Platform};
use broker_core::protocol::names::EVALUATE;
use broker_core::session::InlineDispatchSink;
use broker_core::transport::{self, EndpointSpec};

use common::RedactedSecret;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

pub const TEST_USER: &str = "alice";
pub const TEST_SECRET: &str = "s3cret";
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Request name that makes the stub host drop its channel.
pub const CRASH: &str = "crash";

pub fn credentials() -> Credentials {
    Credentials::new(TEST_USER, TEST_SECRET)
}

/// Config with one account and short timeouts.
pub fn test_config(host_path: Option<PathBuf>) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.auth.accounts.push(AccountConfig {
        user: TEST_USER.to_string(),
        secret: RedactedSecret::new(TEST_SECRET),
        expires_at: None,
    });
    config.host.host_path = host_path;
    config.host.startup_timeout_ms = 5_000;
    config.host.interrupt_timeout_ms = 500;
    config
}

/// Broker whose locator searches an empty directory, so only the configured
/// host path can be found.
pub fn new_broker(config: BrokerConfig, search_root: &Path) -> Arc<Broker> {
    let authenticator = Arc::new(AccountAuthenticator::new(&config.auth));
    Broker::new(
        config,
        authenticator,
        ExecutableLocator::new(search_root, Platform::current()),
        Arc::new(InlineDispatchSink),
    )
}

/// Write an executable `/bin/sh` script standing in for the engine-host.
#[cfg(unix)]
pub fn write_host_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-host.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write host script");
    let mut perms = std::fs::metadata(&path)
        .expect("Failed to stat host script")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("Failed to chmod host script");
    path
}

/// Poll `condition` until it holds or [`WAIT_LIMIT`] passes.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// In-process engine-host: evaluates `1+1`, drops the channel on [`CRASH`],
/// rejects everything else, and counts `Shutdown` notifications.
pub struct StubHost {
    pub endpoint: EndpointSpec,
    pub shutdowns: Arc<AtomicUsize>,
    pub task: JoinHandle<()>,
}

impl StubHost {
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// Listen on `requested` and serve one connection.
pub async fn spawn_stub_host(requested: &EndpointSpec) -> StubHost {
    let mut listener = transport::listen(requested)
        .await
        .expect("Failed to listen for stub host");
    let endpoint = listener.endpoint();
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let counter = shutdowns.clone();

    let task = tokio::spawn(async move {
        let channel = listener.accept().await.expect("Stub host accept failed");
        let (host, mut events) = HostConnection::start(channel, BlobSettings::default());

        while let Some(event) = events.recv().await {
            match event {
                HostEvent::Request(request) if request.name == EVALUATE => {
                    let answered = match request.payload["expression"].as_str() {
                        Some("1+1") => host.respond(&request, json!(2)),
                        _ => host.respond_error(&request, "unsupported expression"),
                    };
                    answered.expect("Stub host failed to respond");
                }
                HostEvent::Request(request) if request.name == CRASH => host.close(),
                HostEvent::Request(request) => {
                    let _ = host.respond_error(&request, "unknown request");
                }
                HostEvent::Shutdown => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    host.close();
                }
                _ => {}
            }
        }
        // Keep the listener (and its socket file) alive until the session ends.
        drop(listener);
    });

    StubHost {
        endpoint,
        shutdowns,
        task,
    }
}
