use crate::helpers::{credentials, new_broker, test_config, wait_until};

use broker_core::auth::Credentials;
use broker_core::broker::SessionOptions;
use broker_core::error::broker::BrokerError;
use broker_core::session::SessionState;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn given_existing_session_id_when_creating_again_then_duplicate_and_first_untouched() {
    // GIVEN: A session named "shared"
    let dir = TempDir::new().unwrap();
    let broker = new_broker(test_config(None), dir.path());
    let first = broker
        .create_session(&credentials(), Some("shared"), SessionOptions::default())
        .unwrap();

    // WHEN: Creating another with the same id
    let result = broker.create_session(&credentials(), Some("shared"), SessionOptions::default());

    // THEN: Rejected; the first session is still the one in the table
    assert!(matches!(result, Err(BrokerError::DuplicateSession { .. })));
    assert_eq!(broker.sessions().len(), 1);
    assert!(std::sync::Arc::ptr_eq(
        &broker.session("shared").unwrap(),
        &first
    ));
}

#[tokio::test]
async fn given_no_session_name_when_creating_then_unique_ids_assigned() {
    let dir = TempDir::new().unwrap();
    let broker = new_broker(test_config(None), dir.path());

    let a = broker
        .create_session(&credentials(), None, SessionOptions::default())
        .unwrap();
    let b = broker
        .create_session(&credentials(), None, SessionOptions::default())
        .unwrap();

    assert_ne!(a.id(), b.id());
    assert_eq!(broker.sessions().len(), 2);
}

/// **VALUE**: A failed authentication leaves no trace.
///
/// **BUG THIS CATCHES**: Inserting the session before checking credentials,
/// which lets an unauthenticated caller reserve session ids.
#[tokio::test]
async fn given_wrong_secret_when_creating_session_then_auth_error_and_no_session() {
    // GIVEN: A broker with one account
    let dir = TempDir::new().unwrap();
    let broker = new_broker(test_config(None), dir.path());

    // WHEN: Creating a session with a bad secret
    let result = broker.create_session(
        &Credentials::new("alice", "wrong"),
        Some("s1"),
        SessionOptions::default(),
    );

    // THEN: 401 and nothing created
    let error = result.err().expect("authentication should fail");
    assert_eq!(error.status_code().0, 401);
    assert!(broker.sessions().is_empty());
}

#[tokio::test]
async fn given_no_host_binary_when_starting_then_host_not_found_and_session_dropped() {
    // GIVEN: A configured host path that does not exist
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("R.Host");
    let broker = new_broker(test_config(Some(missing.clone())), dir.path());
    let session = broker
        .create_session(&credentials(), Some("s1"), SessionOptions::default())
        .unwrap();

    // WHEN: Starting the host
    let result = broker.start_host("s1", &CancellationToken::new()).await;

    // THEN: HostNotFound naming the searched path
    match result {
        Err(BrokerError::HostNotFound { searched, .. }) => assert_eq!(searched, vec![missing]),
        other => panic!("expected HostNotFound, got {:?}", other.err()),
    }

    // AND: The session faulted and left the table
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(wait_until(|| broker.session("s1").is_none()).await);
}

#[tokio::test]
async fn given_unknown_session_when_stopping_then_unknown_session() {
    let dir = TempDir::new().unwrap();
    let broker = new_broker(test_config(None), dir.path());

    let result = broker.stop_host("nope").await;

    assert!(matches!(result, Err(BrokerError::UnknownSession { .. })));
}

#[cfg(unix)]
mod with_host_process {
    use crate::helpers::{
        credentials, new_broker, spawn_stub_host, test_config, wait_until, write_host_script,
    };

    use broker_core::supervisor::process::is_alive;

    use broker_core::broker::SessionOptions;
    use broker_core::error::broker::BrokerError;
    use broker_core::error::supervisor::SupervisorError;
    use broker_core::session::{FaultReason, SessionState};
    use broker_core::transport::EndpointSpec;

    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};
    use tokio_util::sync::CancellationToken;

    /// Script that records its pid and takes two seconds to announce
    /// `endpoint`.
    fn slow_host_body(dir: &Path, endpoint: &EndpointSpec) -> String {
        format!(
            "echo $$ > {}\nsleep 2\necho 'listening on {endpoint}'\nexec sleep 30",
            dir.join("pid").display()
        )
    }

    fn read_pid(dir: &Path) -> u32 {
        std::fs::read_to_string(dir.join("pid"))
            .expect("host script wrote no pid file")
            .trim()
            .parse()
            .expect("pid file holds a number")
    }

    /// **VALUE**: End-to-end session life: launch, handshake, connect,
    /// evaluate, stop.
    ///
    /// **WHY THIS MATTERS**: This is the path every IDE session takes. The
    /// host process is a script that reports the stub host's endpoint, so
    /// the broker really spawns, parses the handshake and connects.
    #[tokio::test]
    async fn given_host_script_when_session_runs_full_lifecycle_then_stopped_cleanly() {
        // GIVEN: A stub host and a script announcing its endpoint
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(
            dir.path(),
            &format!(
                "echo 'engine starting'\necho 'listening on {}'\nexec sleep 30",
                stub.endpoint
            ),
        );
        let broker = new_broker(test_config(Some(script)), dir.path());

        // WHEN: Creating and starting the session
        let session = broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();
        assert_eq!(session.state(), SessionState::Created);
        broker.start_host("s1", &CancellationToken::new()).await.unwrap();

        // THEN: Running, bound to the endpoint the host reported
        assert_eq!(session.state(), SessionState::Running);
        let handle = session.host().expect("session has a host process");
        assert_eq!(handle.endpoint(), &stub.endpoint);
        assert!(
            handle
                .recent_output()
                .contains(&"engine starting".to_string())
        );

        // AND: Evaluation works
        let value = session
            .evaluate("1+1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, json!(2));

        // WHEN: Stopping
        let state = broker.stop_host("s1").await.unwrap();

        // THEN: Stopped, the host was told to shut down, the process is gone
        assert_eq!(state, SessionState::Stopped);
        assert!(wait_until(|| stub.shutdown_count() == 1).await);
        assert!(handle.has_exited());
        assert!(broker.session("s1").is_none());
    }

    #[tokio::test]
    async fn given_running_session_when_host_process_dies_then_faulted_and_removed() {
        // GIVEN: A host that exits with code 3 a second after its handshake
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(
            dir.path(),
            &format!("echo 'listening on {}'\nsleep 1\nexit 3", stub.endpoint),
        );
        let broker = new_broker(test_config(Some(script)), dir.path());
        let session = broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();
        broker.start_host("s1", &CancellationToken::new()).await.unwrap();

        // WHEN: The process exits on its own
        assert!(wait_until(|| session.state() == SessionState::Faulted).await);

        // THEN: The fault names the exit code and the session is gone
        assert_eq!(session.fault_reason(), Some(FaultReason::HostExited(3)));
        assert!(wait_until(|| broker.session("s1").is_none()).await);
        let result = session.evaluate("1+1", &CancellationToken::new()).await;
        assert!(result.unwrap_err().is_terminated());
    }

    #[tokio::test]
    async fn given_host_exiting_before_handshake_when_starting_then_startup_error_with_output() {
        let dir = TempDir::new().unwrap();
        let script = write_host_script(dir.path(), "echo 'engine library missing'\nexit 1");
        let broker = new_broker(test_config(Some(script)), dir.path());
        let session = broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();

        let result = broker.start_host("s1", &CancellationToken::new()).await;

        match result {
            Err(BrokerError::Supervisor(SupervisorError::Startup { recent_output, .. })) => {
                assert!(recent_output.contains(&"engine library missing".to_string()));
            }
            other => panic!("expected a startup error, got {:?}", other.err()),
        }
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[tokio::test]
    async fn given_stopped_session_when_stopped_again_then_unknown_session() {
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(
            dir.path(),
            &format!("echo 'listening on {}'\nexec sleep 30", stub.endpoint),
        );
        let broker = new_broker(test_config(Some(script)), dir.path());
        broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();
        broker.start_host("s1", &CancellationToken::new()).await.unwrap();

        broker.stop_host("s1").await.unwrap();
        let again = broker.stop_host("s1").await;

        assert!(matches!(again, Err(BrokerError::UnknownSession { .. })));
    }

    /// **VALUE**: Dropping the caller of `start_host` does not strand the
    /// session.
    ///
    /// **BUG THIS CATCHES**: With the launch running inside the caller's
    /// future, a timed-out HTTP handler left the session in `Starting`
    /// forever and every later start failed with an invalid transition.
    #[tokio::test]
    async fn given_start_future_dropped_mid_launch_when_host_announces_then_session_still_runs() {
        // GIVEN: A host that needs two seconds to announce its endpoint
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(dir.path(), &slow_host_body(dir.path(), &stub.endpoint));
        let broker = new_broker(test_config(Some(script)), dir.path());
        let session = broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();

        // WHEN: The caller gives up long before the handshake
        let token = CancellationToken::new();
        let abandoned = timeout(Duration::from_millis(200), broker.start_host("s1", &token)).await;
        assert!(abandoned.is_err());

        // THEN: The start completes on its own and the session is usable
        assert!(wait_until(|| session.state() == SessionState::Running).await);
        let value = session
            .evaluate("1+1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(value, json!(2));

        let state = broker.stop_host("s1").await.unwrap();
        assert_eq!(state, SessionState::Stopped);
    }

    /// **VALUE**: Cancelling a start kills the half-launched host and frees
    /// the session id.
    #[tokio::test]
    async fn given_start_in_progress_when_token_cancelled_then_host_killed_and_id_reusable() {
        // GIVEN: A start stuck waiting for a slow host's handshake
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(dir.path(), &slow_host_body(dir.path(), &stub.endpoint));
        let broker = new_broker(test_config(Some(script)), dir.path());
        let session = broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        // WHEN: The token is cancelled mid-launch
        let result = broker.start_host("s1", &token).await;

        // THEN: The start reports cancellation and the session faults
        let error = result.unwrap_err();
        assert!(matches!(error, BrokerError::StartCancelled { .. }));
        assert_eq!(error.status_code().0, 503);
        assert_eq!(session.state(), SessionState::Faulted);

        // AND: The session leaves the table and its host process is gone
        assert!(wait_until(|| broker.session("s1").is_none()).await);
        let pid = read_pid(dir.path());
        assert!(wait_until(|| !is_alive(pid)).await);

        // AND: The id can be started again
        broker
            .create_session(&credentials(), Some("s1"), SessionOptions::default())
            .unwrap();
        broker
            .start_host("s1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            broker.session("s1").map(|s| s.state()),
            Some(SessionState::Running)
        );
        broker.stop_host("s1").await.unwrap();
    }
}
