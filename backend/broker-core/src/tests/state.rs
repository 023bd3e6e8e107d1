use crate::session::{SessionEvent, SessionState, SessionStateMachine};

const ALL_EVENTS: [SessionEvent; 8] = [
    SessionEvent::StartHost,
    SessionEvent::Connected,
    SessionEvent::BeginEvaluation,
    SessionEvent::EvaluationComplete,
    SessionEvent::Interrupt,
    SessionEvent::StopHost,
    SessionEvent::Stopped,
    SessionEvent::HostDisconnected,
];

fn running() -> SessionStateMachine {
    let machine = SessionStateMachine::new();
    machine.apply(SessionEvent::StartHost).unwrap();
    machine.apply(SessionEvent::Connected).unwrap();
    machine
}

/// **VALUE**: Pins down exactly which events a running session accepts.
///
/// **BUG THIS CATCHES**: A catch-all arm that lets `EvaluationComplete` (or
/// `Stopped`) through from `Running`, which would let a stray response flip
/// the session state.
#[test]
fn given_running_when_each_event_checked_then_only_begin_stop_and_disconnect_are_valid() {
    // GIVEN: The Running state
    let state = SessionState::Running;

    // WHEN: Checking every event
    let valid: Vec<SessionEvent> = ALL_EVENTS
        .into_iter()
        .filter(|event| state.next(*event).is_some())
        .collect();

    // THEN: Exactly three are allowed
    assert_eq!(
        valid,
        vec![
            SessionEvent::BeginEvaluation,
            SessionEvent::StopHost,
            SessionEvent::HostDisconnected
        ]
    );
}

#[test]
fn given_running_when_evaluation_complete_applied_then_rejected_and_state_unchanged() {
    let machine = running();

    let result = machine.apply(SessionEvent::EvaluationComplete);

    assert!(result.is_err());
    assert_eq!(machine.current(), SessionState::Running);
}

#[test]
fn given_full_lifecycle_when_events_applied_in_order_then_reaches_stopped() {
    let machine = SessionStateMachine::new();

    let states: Vec<SessionState> = [
        SessionEvent::StartHost,
        SessionEvent::Connected,
        SessionEvent::BeginEvaluation,
        SessionEvent::EvaluationComplete,
        SessionEvent::BeginEvaluation,
        SessionEvent::Interrupt,
        SessionEvent::StopHost,
        SessionEvent::Stopped,
    ]
    .into_iter()
    .map(|event| machine.apply(event).unwrap())
    .collect();

    assert_eq!(
        states,
        vec![
            SessionState::Starting,
            SessionState::Running,
            SessionState::Evaluating,
            SessionState::Running,
            SessionState::Evaluating,
            SessionState::Running,
            SessionState::Stopping,
            SessionState::Stopped,
        ]
    );
}

/// **VALUE**: Terminal states are final.
///
/// **WHY THIS MATTERS**: A late `Connected` or `StopHost` must not resurrect a
/// faulted session; callers rely on `Faulted` meaning "create a new one".
#[test]
fn given_terminal_state_when_any_event_applied_then_rejected() {
    for terminal in [SessionState::Stopped, SessionState::Faulted] {
        for event in ALL_EVENTS {
            assert_eq!(terminal.next(event), None, "{terminal} accepted {event}");
        }
    }
}

#[test]
fn given_any_non_terminal_state_when_host_disconnected_then_faulted() {
    for state in [
        SessionState::Created,
        SessionState::Starting,
        SessionState::Running,
        SessionState::Evaluating,
        SessionState::Stopping,
    ] {
        assert_eq!(
            state.next(SessionEvent::HostDisconnected),
            Some(SessionState::Faulted)
        );
    }
}

#[test]
fn given_stopping_when_stop_host_applied_again_then_stays_stopping() {
    let machine = running();
    machine.apply(SessionEvent::StopHost).unwrap();

    let result = machine.apply(SessionEvent::StopHost);

    assert_eq!(result.unwrap(), SessionState::Stopping);
}

#[test]
fn given_subscriber_when_transition_applied_then_observes_new_state() {
    let machine = SessionStateMachine::new();
    let mut rx = machine.subscribe();

    machine.apply(SessionEvent::StartHost).unwrap();

    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), SessionState::Starting);
}

#[test]
fn given_stopping_state_when_checked_then_rejects_requests() {
    assert!(SessionState::Stopping.rejects_requests());
    assert!(SessionState::Faulted.rejects_requests());
    assert!(!SessionState::Running.rejects_requests());
    assert!(!SessionState::Created.rejects_requests());
}
