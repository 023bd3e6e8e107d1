use crate::helpers::{CRASH, credentials, new_broker, spawn_stub_host, test_config, wait_until};

use broker_core::blob::BlobSettings;
use broker_core::broker::SessionOptions;
use broker_core::host::{HostConnection, HostEvent};
use broker_core::session::{FaultReason, SessionState};
use broker_core::transport::{self, EndpointSpec};

use std::sync::Arc;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

const WHOAMI: &str = "whoami";

/// Host that reports each request id it receives and answers only once
/// `release` is notified, naming itself in the reply.
struct HeldHost {
    endpoint: EndpointSpec,
    seen: mpsc::UnboundedReceiver<u64>,
    release: Arc<Notify>,
}

async fn spawn_held_host(name: &'static str) -> HeldHost {
    let mut listener = transport::listen(&EndpointSpec::new_local())
        .await
        .expect("Failed to listen for held host");
    let endpoint = listener.endpoint();
    let (seen_tx, seen) = mpsc::unbounded_channel();
    let release = Arc::new(Notify::new());
    let gate = release.clone();

    tokio::spawn(async move {
        let channel = listener.accept().await.expect("Held host accept failed");
        let (host, mut events) = HostConnection::start(channel, BlobSettings::default());

        while let Some(event) = events.recv().await {
            match event {
                HostEvent::Request(request) if request.name == WHOAMI => {
                    let _ = seen_tx.send(request.id);
                    gate.notified().await;
                    host.respond(&request, json!({ "host": name, "request": request.id }))
                        .expect("Held host failed to respond");
                }
                HostEvent::Shutdown => host.close(),
                _ => {}
            }
        }
        drop(listener);
    });

    HeldHost {
        endpoint,
        seen,
        release,
    }
}

fn remote(endpoint: &EndpointSpec) -> SessionOptions {
    SessionOptions {
        remote: Some(endpoint.clone()),
        authorization: Some("Bearer remote-token".to_string()),
        ..SessionOptions::default()
    }
}

#[tokio::test]
async fn given_remote_websocket_host_when_session_started_then_evaluates_without_launching() {
    // GIVEN: A stub host on a WebSocket endpoint
    let dir = TempDir::new().unwrap();
    let stub = spawn_stub_host(&EndpointSpec::parse("ws://127.0.0.1:0/").unwrap()).await;
    let broker = new_broker(test_config(None), dir.path());
    let session = broker
        .create_session(&credentials(), Some("remote"), remote(&stub.endpoint))
        .unwrap();

    // WHEN: Starting and evaluating
    broker.start_host("remote", &CancellationToken::new()).await.unwrap();
    let value = session
        .evaluate("1+1", &CancellationToken::new())
        .await
        .unwrap();

    // THEN: The remote host answered and no process was launched
    assert_eq!(value, json!(2));
    assert!(session.host().is_none());

    // AND: Stopping sends Shutdown and ends Stopped
    let state = broker.stop_host("remote").await.unwrap();
    assert_eq!(state, SessionState::Stopped);
    assert!(wait_until(|| stub.shutdown_count() == 1).await);
}

/// **VALUE**: Sessions are isolated; one host dying leaves the other alone.
///
/// **BUG THIS CATCHES**: Shared per-broker channel state (pending table,
/// fault flag) that lets one session's fault leak into another.
#[tokio::test]
async fn given_two_sessions_when_one_host_drops_channel_then_other_keeps_working() {
    // GIVEN: Two sessions on two stub hosts
    let dir = TempDir::new().unwrap();
    let stub_a = spawn_stub_host(&EndpointSpec::new_local()).await;
    let stub_b = spawn_stub_host(&EndpointSpec::new_local()).await;
    let broker = new_broker(test_config(None), dir.path());
    let a = broker
        .create_session(&credentials(), Some("a"), remote(&stub_a.endpoint))
        .unwrap();
    let b = broker
        .create_session(&credentials(), Some("b"), remote(&stub_b.endpoint))
        .unwrap();
    broker.start_host("a", &CancellationToken::new()).await.unwrap();
    broker.start_host("b", &CancellationToken::new()).await.unwrap();

    // WHEN: Host A drops its channel mid-request
    let pending = a.request(CRASH, Value::Null, Vec::new()).unwrap();
    let result = pending.wait().await;

    // THEN: A's request is terminated and A faults
    assert!(result.unwrap_err().is_terminated());
    assert!(wait_until(|| a.state() == SessionState::Faulted).await);
    assert!(matches!(a.fault_reason(), Some(FaultReason::Transport(_))));
    assert!(wait_until(|| broker.session("a").is_none()).await);

    // AND: B still evaluates
    let value = b.evaluate("1+1", &CancellationToken::new()).await.unwrap();
    assert_eq!(value, json!(2));
    assert_eq!(b.state(), SessionState::Running);
}

#[tokio::test]
async fn given_unreachable_remote_endpoint_when_starting_then_transport_error_and_faulted() {
    let dir = TempDir::new().unwrap();
    let broker = new_broker(test_config(None), dir.path());
    let session = broker
        .create_session(&credentials(), Some("r"), remote(&EndpointSpec::new_local()))
        .unwrap();

    let result = broker.start_host("r", &CancellationToken::new()).await;

    let error = result.err().expect("connecting to nothing should fail");
    assert_eq!(error.status_code().0, 502);
    assert_eq!(session.state(), SessionState::Faulted);
}

/// **VALUE**: Request ids are per session; the same id in flight on two
/// sessions resolves each caller with its own host's answer.
///
/// **BUG THIS CATCHES**: A pending table keyed by request id alone, shared
/// across sessions, would hand one session's response to the other.
#[tokio::test]
async fn given_same_request_id_in_flight_on_two_sessions_when_hosts_answer_then_each_gets_own_reply()
{
    // GIVEN: Two running sessions on hosts that hold their replies
    let dir = TempDir::new().unwrap();
    let mut host_a = spawn_held_host("a").await;
    let mut host_b = spawn_held_host("b").await;
    let broker = new_broker(test_config(None), dir.path());
    let a = broker
        .create_session(&credentials(), Some("a"), remote(&host_a.endpoint))
        .unwrap();
    let b = broker
        .create_session(&credentials(), Some("b"), remote(&host_b.endpoint))
        .unwrap();
    broker.start_host("a", &CancellationToken::new()).await.unwrap();
    broker.start_host("b", &CancellationToken::new()).await.unwrap();

    // WHEN: Both sessions send before either host answers
    let pending_a = a.request(WHOAMI, Value::Null, Vec::new()).unwrap();
    let pending_b = b.request(WHOAMI, Value::Null, Vec::new()).unwrap();
    let seen_a = host_a.seen.recv().await.expect("host a saw no request");
    let seen_b = host_b.seen.recv().await.expect("host b saw no request");

    // THEN: The same id is outstanding on both
    assert_eq!(pending_a.id(), pending_b.id());
    assert_eq!(seen_a, seen_b);

    // WHEN: B answers first, then A
    host_b.release.notify_one();
    let reply_b = pending_b.wait().await.unwrap();
    host_a.release.notify_one();
    let reply_a = pending_a.wait().await.unwrap();

    // THEN: Each caller got its own host's reply
    assert_eq!(reply_a.payload, json!({ "host": "a", "request": seen_a }));
    assert_eq!(reply_b.payload, json!({ "host": "b", "request": seen_b }));
    assert_eq!(reply_a.correlation_id, Some(seen_a));
}
