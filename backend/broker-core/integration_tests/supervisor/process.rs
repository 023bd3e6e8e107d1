//! Process supervision against real child processes. The engine-host is a
//! shell script, so these only run on unix.

#![cfg(unix)]

use crate::helpers::{wait_until, write_host_script};

use broker_core::error::supervisor::SupervisorError;
use broker_core::supervisor::process::is_alive;
use broker_core::supervisor::{ProcessSupervisor, SupervisorEvent};
use broker_core::transport::EndpointSpec;

use std::time::Duration;

use tempfile::TempDir;

fn supervisor(startup_timeout: Duration) -> ProcessSupervisor {
    ProcessSupervisor::new(startup_timeout, None)
}

fn requested() -> EndpointSpec {
    EndpointSpec::LocalPipe("/tmp/rhost-requested.sock".to_string())
}

#[tokio::test]
async fn given_host_echoing_its_env_endpoint_when_launched_then_handshake_matches_request() {
    // GIVEN: A host that reports whatever RHOST_ENDPOINT says
    let dir = TempDir::new().unwrap();
    let script = write_host_script(dir.path(), "echo \"listening on $RHOST_ENDPOINT\"\nexec sleep 30");

    // WHEN: Launching
    let handle = supervisor(Duration::from_secs(5))
        .launch(&script, &requested())
        .await
        .unwrap();

    // THEN: The reported endpoint is the requested one
    assert_eq!(handle.endpoint(), &requested());
    assert!(handle.pid() > 0);
    assert!(!handle.has_exited());
}

#[tokio::test]
async fn given_host_passing_endpoint_flag_when_launched_then_argument_carries_endpoint() {
    let dir = TempDir::new().unwrap();
    // $1 is --endpoint, $2 the value.
    let script = write_host_script(dir.path(), "echo \"listening on $2\"\nexec sleep 30");

    let handle = supervisor(Duration::from_secs(5))
        .launch(&script, &requested())
        .await
        .unwrap();

    assert_eq!(handle.endpoint(), &requested());
}

/// **VALUE**: Graceful termination ends the process and reports the exit on
/// the event stream.
///
/// **BUG THIS CATCHES**: Exit only being observable through the handle, so
/// the broker never learns that a host died.
#[tokio::test]
async fn given_running_host_when_terminated_gracefully_then_exit_event_broadcast() {
    // GIVEN: A running host and an event subscriber
    let dir = TempDir::new().unwrap();
    let script = write_host_script(dir.path(), "echo 'listening on pipe:x'\nexec sleep 30");
    let supervisor = supervisor(Duration::from_secs(5));
    let mut events = supervisor.subscribe();
    let handle = supervisor.launch(&script, &requested()).await.unwrap();

    // WHEN: Terminating gracefully
    let code = supervisor.terminate(&handle, true).await.unwrap();

    // THEN: Killed by signal, and the event names this handle
    assert_eq!(code, -1);
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no exit event")
        .unwrap();
    assert_eq!(
        event,
        SupervisorEvent::Exited {
            handle_id: handle.id(),
            pid: handle.pid(),
            exit_code: -1,
        }
    );
    assert!(!is_alive(handle.pid()));
}

#[tokio::test]
async fn given_host_exiting_on_its_own_when_waited_then_exit_code_reported() {
    let dir = TempDir::new().unwrap();
    let script = write_host_script(dir.path(), "echo 'listening on pipe:x'\nsleep 0.2\nexit 7");
    let handle = supervisor(Duration::from_secs(5))
        .launch(&script, &requested())
        .await
        .unwrap();

    let code = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("host never exited");

    assert_eq!(code, 7);
    assert_eq!(handle.exit_code(), Some(7));
}

#[tokio::test]
async fn given_host_that_never_announces_when_launched_then_timeout_and_process_killed() {
    // GIVEN: A host that stays silent
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("pid");
    let script = write_host_script(
        dir.path(),
        &format!("echo $$ > {}\nexec sleep 30", pid_file.display()),
    );

    // WHEN: Launching with a short startup timeout
    let result = supervisor(Duration::from_millis(500))
        .launch(&script, &requested())
        .await;

    // THEN: Timeout, and the process was killed
    assert!(matches!(result, Err(SupervisorError::Timeout { .. })));
    let pid: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(wait_until(|| !is_alive(pid)).await);
}

#[tokio::test]
async fn given_unparseable_endpoint_in_handshake_when_launched_then_requested_endpoint_used() {
    let dir = TempDir::new().unwrap();
    let script = write_host_script(dir.path(), "echo 'listening on nonsense'\nexec sleep 30");

    let handle = supervisor(Duration::from_secs(5))
        .launch(&script, &requested())
        .await
        .unwrap();

    assert_eq!(handle.endpoint(), &requested());
}

#[tokio::test]
async fn given_missing_binary_when_launched_then_spawn_error() {
    let dir = TempDir::new().unwrap();

    let result = supervisor(Duration::from_secs(1))
        .launch(&dir.path().join("no-such-host"), &requested())
        .await;

    assert!(matches!(result, Err(SupervisorError::Spawn { .. })));
}

#[tokio::test]
async fn given_last_handle_dropped_when_host_running_then_process_killed() {
    let dir = TempDir::new().unwrap();
    let script = write_host_script(dir.path(), "echo 'listening on pipe:x'\nexec sleep 30");
    let handle = supervisor(Duration::from_secs(5))
        .launch(&script, &requested())
        .await
        .unwrap();
    let pid = handle.pid();

    drop(handle);

    assert!(wait_until(|| !is_alive(pid)).await);
}
