//! Per-session lifecycle.
//!
//! ```text
//! Created -> Starting -> Running <-> Evaluating
//!                           \           /
//!                            -> Stopping -> Stopped
//! any non-terminal state --HostDisconnected--> Faulted
//! ```
//!
//! `Stopped` and `Faulted` are terminal: a new session has to be created to
//! resume work. Rejected transitions leave the state untouched.

use crate::error::session::SessionError;

use common::ErrorLocation;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::panic::Location;

use log::debug;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Created,
    Starting,
    Running,
    Evaluating,
    Stopping,
    Stopped,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    StartHost,
    Connected,
    BeginEvaluation,
    EvaluationComplete,
    Interrupt,
    StopHost,
    Stopped,
    HostDisconnected,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Faulted)
    }

    /// States in which a request fails with `SessionTerminated` without
    /// reaching the wire.
    pub fn rejects_requests(self) -> bool {
        matches!(
            self,
            SessionState::Stopping | SessionState::Stopped | SessionState::Faulted
        )
    }

    pub fn accepts_requests(self) -> bool {
        matches!(self, SessionState::Running | SessionState::Evaluating)
    }

    /// Next state for `event`, or `None` when the transition is not allowed.
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        if self.is_terminal() {
            return None;
        }

        match (self, event) {
            (_, E::HostDisconnected) => Some(S::Faulted),
            (_, E::StopHost) => Some(S::Stopping),
            (S::Created, E::StartHost) => Some(S::Starting),
            (S::Starting, E::Connected) => Some(S::Running),
            (S::Running, E::BeginEvaluation) => Some(S::Evaluating),
            (S::Evaluating, E::EvaluationComplete) => Some(S::Running),
            (S::Evaluating, E::Interrupt) => Some(S::Running),
            (S::Stopping, E::Stopped) => Some(S::Stopped),
            _ => None,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{self:?}")
    }
}

impl Display for SessionEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{self:?}")
    }
}

/// Shared, observable session state.
///
/// Transitions are applied atomically inside the watch channel, so the
/// receive loop, the supervisor event pump and API callers can race on it.
#[derive(Debug)]
pub struct SessionStateMachine {
    state: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self { state }
    }

    pub fn current(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    #[track_caller]
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, SessionError> {
        let location = ErrorLocation::from(Location::caller());
        let mut outcome = None;

        self.state.send_if_modified(|state| {
            let from = *state;
            match from.next(event) {
                Some(next) => {
                    *state = next;
                    outcome = Some(Ok(next));
                    next != from
                }
                None => {
                    outcome = Some(Err(SessionError::InvalidTransition {
                        from,
                        event,
                        location,
                    }));
                    false
                }
            }
        });

        match outcome {
            Some(Ok(next)) => {
                debug!("Session state -> {next} on {event}");
                Ok(next)
            }
            Some(Err(e)) => Err(e),
            None => Err(SessionError::InvalidTransition {
                from: self.current(),
                event,
                location,
            }),
        }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
