use crate::blob::{BlobChannel, BlobSettings};
use crate::error::session::SessionError;
use crate::protocol::names::{EVALUATE, SHUTDOWN};
use crate::protocol::Envelope;
use crate::session::callbacks::HostCallbacks;
use crate::session::dispatch::DispatchSink;
use crate::session::multiplexer::{
    DEFAULT_INTERRUPT_TIMEOUT, Multiplexer, MultiplexerContext, PendingResponse,
};
use crate::session::state::{SessionEvent, SessionState, SessionStateMachine};
use crate::session::FaultReason;
use crate::supervisor::ProcessHandle;
use crate::transport::Channel;

use common::ErrorLocation;
use models::SessionSummary;

use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::sync::{Mutex as TokioMutex, watch};
use tokio_util::sync::CancellationToken;

const NO_EVALUATION: u64 = 0;

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub interrupt_timeout: Duration,
    pub blobs: BlobSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            interrupt_timeout: DEFAULT_INTERRUPT_TIMEOUT,
            blobs: BlobSettings::default(),
        }
    }
}

/// One front end driving one engine-host.
///
/// Owned by the broker's session table. Front ends hold a
/// [`SessionHandle`] instead of an `Arc` so that dropping the session from
/// the table ends it.
pub struct Session {
    id: String,
    user: String,
    state: Arc<SessionStateMachine>,
    fault: Arc<OnceLock<FaultReason>>,
    mux: OnceLock<Multiplexer>,
    host: Mutex<Option<ProcessHandle>>,
    callbacks: Arc<dyn HostCallbacks>,
    dispatch: Arc<dyn DispatchSink>,
    settings: SessionSettings,
    evaluation: TokioMutex<()>,
    current_evaluation: AtomicU64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        user: impl Into<String>,
        callbacks: Arc<dyn HostCallbacks>,
        dispatch: Arc<dyn DispatchSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id: id.into(),
            user: user.into(),
            state: Arc::new(SessionStateMachine::new()),
            fault: Arc::new(OnceLock::new()),
            mux: OnceLock::new(),
            host: Mutex::new(None),
            callbacks,
            dispatch,
            settings,
            evaluation: TokioMutex::new(()),
            current_evaluation: AtomicU64::new(NO_EVALUATION),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Why the session faulted, once it has.
    pub fn fault_reason(&self) -> Option<FaultReason> {
        self.fault.get().cloned()
    }

    pub fn host(&self) -> Option<ProcessHandle> {
        self.host.lock().ok().and_then(|host| host.clone())
    }

    pub(crate) fn set_host(&self, handle: ProcessHandle) {
        if let Ok(mut host) = self.host.lock() {
            *host = Some(handle);
        }
    }

    /// Blob transfer for this session; `None` until connected.
    pub fn blobs(&self) -> Option<BlobChannel> {
        self.mux.get().map(|mux| mux.blobs().clone())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            user: self.user.clone(),
            state: self.state().to_string(),
            host: self.host().and_then(|handle| handle.info().ok()),
        }
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    pub(crate) fn begin_start(&self) -> Result<SessionState, SessionError> {
        self.state.apply(SessionEvent::StartHost)
    }

    /// Bind the connected channel and move to `Running`.
    pub(crate) fn attach(&self, channel: Channel) -> Result<SessionState, SessionError> {
        let context = MultiplexerContext {
            state: self.state.clone(),
            fault: self.fault.clone(),
            callbacks: self.callbacks.clone(),
            dispatch: self.dispatch.clone(),
            interrupt_timeout: self.settings.interrupt_timeout,
            blobs: self.settings.blobs,
        };

        let mux = Multiplexer::start(channel, context);
        if let Err(mux) = self.mux.set(mux) {
            mux.close();
            return Err(SessionError::InvalidTransition {
                from: self.state(),
                event: SessionEvent::Connected,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        match self.state.apply(SessionEvent::Connected) {
            Ok(state) => {
                info!("Session {} running", self.id);
                Ok(state)
            }
            Err(e) => {
                if let Some(mux) = self.mux.get() {
                    mux.close();
                }
                Err(e)
            }
        }
    }

    /// Startup failed before the session reached `Running`.
    pub(crate) fn fail_start(&self, reason: FaultReason) {
        warn!("Session {} failed to start: {reason}", self.id);
        let _ = self.fault.set(reason);
        if let Err(e) = self.state.apply(SessionEvent::HostDisconnected) {
            debug!("HostDisconnected not applied: {e}");
        }
    }

    pub(crate) fn begin_stop(&self) -> Result<SessionState, SessionError> {
        self.state.apply(SessionEvent::StopHost)
    }

    /// Ask the host to exit, then close the channel.
    pub(crate) fn shutdown_channel(&self) {
        if let Some(mux) = self.mux.get() {
            if let Err(e) = mux.notify(SHUTDOWN, Value::Null) {
                debug!("Shutdown notification not sent: {e}");
            }
            mux.close();
        }
    }

    pub(crate) fn finish_stop(&self) -> Result<SessionState, SessionError> {
        let state = self.state.apply(SessionEvent::Stopped)?;
        info!("Session {} stopped", self.id);
        Ok(state)
    }

    /// The supervised host exited. Outside of `Stopping` that is a fault.
    pub fn on_host_exited(&self, exit_code: i32) {
        let state = self.state();
        if state == SessionState::Stopping || state.is_terminal() {
            debug!("Session {} host exited with {exit_code} in {state}", self.id);
            return;
        }

        let reason = FaultReason::HostExited(exit_code);
        match self.mux.get() {
            Some(mux) => mux.fault(reason),
            None => self.fail_start(reason),
        }
    }

    // ============================================
    // REQUESTS
    // ============================================

    /// Send an arbitrary request to the host.
    pub fn request(
        &self,
        name: &str,
        payload: Value,
        blob_ids: Vec<u64>,
    ) -> Result<PendingResponse, SessionError> {
        let state = self.state();
        if state.rejects_requests() {
            return Err(SessionError::terminated());
        }

        match self.mux.get() {
            Some(mux) => mux.send(name, payload, blob_ids),
            None => Err(SessionError::not_started(state)),
        }
    }

    /// Evaluate `expression` and return the result payload.
    ///
    /// Only one evaluation runs at a time; a second caller waits for the
    /// first. Cancelling `token` interrupts the evaluation, or abandons the
    /// wait for a turn, and returns `Cancelled`.
    pub async fn evaluate(
        &self,
        expression: &str,
        token: &CancellationToken,
    ) -> Result<Value, SessionError> {
        // Request id 0 in the error: nothing was sent yet
        let _gate = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SessionError::cancelled(NO_EVALUATION)),
            gate = self.evaluation.lock() => gate,
        };

        let state = self.state();
        if !state.accepts_requests() {
            return Err(if state.rejects_requests() {
                SessionError::terminated()
            } else {
                SessionError::not_started(state)
            });
        }

        self.state.apply(SessionEvent::BeginEvaluation)?;

        let pending = match self.request(EVALUATE, json!({ "expression": expression }), Vec::new())
        {
            Ok(pending) => pending,
            Err(e) => {
                self.end_evaluation(SessionEvent::EvaluationComplete);
                return Err(e);
            }
        };

        self.current_evaluation.store(pending.id(), Ordering::Release);
        let result = pending.wait_with_cancellation(token).await;
        self.current_evaluation.store(NO_EVALUATION, Ordering::Release);

        match result {
            Ok(Envelope { payload, .. }) => {
                self.end_evaluation(SessionEvent::EvaluationComplete);
                Ok(payload)
            }
            Err(e) if e.is_cancelled() => {
                self.end_evaluation(SessionEvent::Interrupt);
                Err(e)
            }
            Err(e) => {
                self.end_evaluation(SessionEvent::EvaluationComplete);
                Err(e)
            }
        }
    }

    fn end_evaluation(&self, event: SessionEvent) {
        if self.state() == SessionState::Evaluating
            && let Err(e) = self.state.apply(event)
        {
            debug!("{event} not applied: {e}");
        }
    }

    /// Interrupt the running evaluation, if any.
    pub fn interrupt(&self) -> bool {
        match self.current_evaluation.load(Ordering::Acquire) {
            NO_EVALUATION => false,
            id => self.cancel(id),
        }
    }

    pub fn cancel(&self, request_id: u64) -> bool {
        self.mux
            .get()
            .is_some_and(|mux| mux.cancel(request_id))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mux) = self.mux.get() {
            mux.close();
        }
    }
}

/// Weak reference held by front ends.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    session: Weak<Session>,
}

impl SessionHandle {
    pub fn new(session: &Arc<Session>) -> Self {
        Self {
            id: session.id.clone(),
            session: Arc::downgrade(session),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session, while the broker still holds it.
    pub fn upgrade(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// `Stopped` once the broker has dropped the session.
    pub fn state(&self) -> SessionState {
        self.upgrade()
            .map(|session| session.state())
            .unwrap_or(SessionState::Stopped)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        token: &CancellationToken,
    ) -> Result<Value, SessionError> {
        let session = self.upgrade().ok_or_else(SessionError::terminated)?;
        session.evaluate(expression, token).await
    }

    pub fn request(
        &self,
        name: &str,
        payload: Value,
        blob_ids: Vec<u64>,
    ) -> Result<PendingResponse, SessionError> {
        let session = self.upgrade().ok_or_else(SessionError::terminated)?;
        session.request(name, payload, blob_ids)
    }
}
