//! The broker: authenticates callers, owns the session table, and starts and
//! stops engine-hosts for those sessions.
//!
//! Only the session table, the process supervisor and the authentication
//! cache are shared between sessions. Each session otherwise runs on its own
//! channel and tasks.

pub mod server;

use crate::auth::{AuthCache, AuthToken, Authenticator, Credentials};
use crate::blob::BlobSettings;
use crate::config::BrokerConfig;
use crate::error::broker::BrokerError;
use crate::error::session::SessionError;
use crate::locator::ExecutableLocator;
use crate::session::{
    DispatchSink, FaultReason, HostCallbacks, NoopCallbacks, Session, SessionSettings,
    SessionState,
};
use crate::supervisor::{ProcessHandle, ProcessSupervisor, SupervisorEvent};
use crate::transport::{self, EndpointSpec};

use common::ErrorLocation;
use models::SessionSummary;

use std::collections::HashMap;
use std::panic::Location;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::spawn as TokioSpawn;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long a host gets to exit on its own after `Shutdown`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Per-session choices made by the front end.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Callbacks for host notifications; defaults to [`NoopCallbacks`].
    pub callbacks: Option<Arc<dyn HostCallbacks>>,
    /// Connect to an already running engine-host instead of launching one.
    pub remote: Option<EndpointSpec>,
    /// `Authorization` header for a remote WebSocket endpoint.
    pub authorization: Option<String>,
}

struct SessionEntry {
    session: Arc<Session>,
    options: SessionOptions,
}

pub struct Broker {
    config: BrokerConfig,
    authenticator: Arc<dyn Authenticator>,
    auth_cache: AuthCache,
    locator: ExecutableLocator,
    supervisor: ProcessSupervisor,
    dispatch: Arc<dyn DispatchSink>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl Broker {
    /// Build a broker and start listening for host exits. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: BrokerConfig,
        authenticator: Arc<dyn Authenticator>,
        locator: ExecutableLocator,
        dispatch: Arc<dyn DispatchSink>,
    ) -> Arc<Self> {
        let locator = locator.with_host_override(config.host.host_path.clone());
        let supervisor =
            ProcessSupervisor::new(config.startup_timeout(), config.host.log_folder.clone());

        let broker = Arc::new(Self {
            auth_cache: AuthCache::new(config.token_lifetime()),
            config,
            authenticator,
            locator,
            supervisor,
            dispatch,
            sessions: RwLock::new(HashMap::new()),
        });

        broker.watch_supervisor();
        broker
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            interrupt_timeout: self.config.interrupt_timeout(),
            blobs: BlobSettings {
                chunk_size: self.config.blobs.chunk_size,
                max_out_of_order: self.config.blobs.max_out_of_order,
                max_unclaimed: self.config.blobs.max_unclaimed,
            },
        }
    }

    // ============================================
    // AUTHENTICATION
    // ============================================

    /// Validate credentials; the resulting token is cached for the configured
    /// lifetime.
    pub fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken, BrokerError> {
        let token = self.authenticator.authenticate(credentials)?;
        Ok(self.auth_cache.store(token))
    }

    /// Resolve a bearer token issued by [`authenticate`](Self::authenticate).
    pub fn resolve_token(&self, id: &Uuid) -> Option<AuthToken> {
        self.auth_cache.find(id)
    }

    // ============================================
    // SESSIONS
    // ============================================

    /// Authenticate and create a session in `Created`.
    ///
    /// No session exists and nothing is launched when authentication fails.
    pub fn create_session(
        self: &Arc<Self>,
        credentials: &Credentials,
        name: Option<&str>,
        options: SessionOptions,
    ) -> Result<Arc<Session>, BrokerError> {
        let token = self.authenticate(credentials)?;
        self.open_session(&token, name, options)
    }

    /// Create a session for an already authenticated caller.
    pub fn open_session(
        self: &Arc<Self>,
        token: &AuthToken,
        name: Option<&str>,
        options: SessionOptions,
    ) -> Result<Arc<Session>, BrokerError> {
        let id = name
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let callbacks = options
            .callbacks
            .clone()
            .unwrap_or_else(|| Arc::new(NoopCallbacks));

        let session = Arc::new(Session::new(
            id.clone(),
            token.user.clone(),
            callbacks,
            self.dispatch.clone(),
            self.session_settings(),
        ));

        {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| BrokerError::unknown_session(&id))?;
            if sessions.contains_key(&id) {
                return Err(BrokerError::DuplicateSession {
                    id,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    session: session.clone(),
                    options,
                },
            );
        }

        info!("Session {id} created for '{}'", token.user);
        self.watch_session(&session);
        Ok(session)
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .ok()?
            .get(id)
            .map(|entry| entry.session.clone())
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let Ok(sessions) = self.sessions.read() else {
            return Vec::new();
        };
        let mut summaries: Vec<SessionSummary> =
            sessions.values().map(|entry| entry.session.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    fn options(&self, id: &str) -> Option<SessionOptions> {
        self.sessions
            .read()
            .ok()?
            .get(id)
            .map(|entry| entry.options.clone())
    }

    fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .ok()?
            .remove(id)
            .map(|entry| entry.session)
    }

    /// Launch (or connect to) the engine-host and move the session to
    /// `Running`. On failure or cancellation the session ends `Faulted` and
    /// any launched process is killed.
    ///
    /// Launch and connect run on their own task, so dropping this future
    /// leaves the start to finish or fail on its own; cancel `token` to
    /// abandon it.
    pub async fn start_host(
        self: &Arc<Self>,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Arc<Session>, BrokerError> {
        let session = self
            .session(id)
            .ok_or_else(|| BrokerError::unknown_session(id))?;
        let options = self.options(id).unwrap_or_default();

        session.begin_start()?;

        let broker = self.clone();
        let starting = session.clone();
        let token = token.clone();
        let task =
            TokioSpawn(async move { broker.complete_start(&starting, &options, &token).await });

        match task.await {
            Ok(result) => result.map(|()| session),
            Err(e) => {
                session.fail_start(FaultReason::Transport(format!("start task failed: {e}")));
                Err(BrokerError::start_cancelled(id))
            }
        }
    }

    async fn complete_start(
        &self,
        session: &Session,
        options: &SessionOptions,
        token: &CancellationToken,
    ) -> Result<(), BrokerError> {
        let connected = tokio::select! {
            biased;
            _ = token.cancelled() => Err(BrokerError::start_cancelled(session.id())),
            result = self.connect_host(session, options) => result,
        };

        if let Err(e) = &connected {
            session.fail_start(FaultReason::Transport(e.to_string()));
            if let Some(handle) = session.host() {
                let _ = self.supervisor.terminate(&handle, false).await;
            }
        }
        connected
    }

    async fn connect_host(
        &self,
        session: &Session,
        options: &SessionOptions,
    ) -> Result<(), BrokerError> {
        let channel = match &options.remote {
            Some(endpoint) => {
                info!("Session {} connecting to remote host {endpoint}", session.id());
                transport::connect(endpoint, options.authorization.as_deref()).await?
            }
            None => {
                let handle = self.launch_host().await?;
                session.set_host(handle.clone());
                transport::connect(handle.endpoint(), None).await?
            }
        };

        session.attach(channel)?;
        Ok(())
    }

    async fn launch_host(&self) -> Result<ProcessHandle, BrokerError> {
        let host_path =
            self.locator
                .resolve_host_path()
                .ok_or_else(|| BrokerError::HostNotFound {
                    searched: self.locator.host_search_paths(),
                    location: ErrorLocation::from(Location::caller()),
                })?;

        let endpoint = EndpointSpec::new_local();
        Ok(self.supervisor.launch(&host_path, &endpoint).await?)
    }

    /// Stop the session's host and drop the session.
    ///
    /// Sends `Shutdown`, closes the channel, gives the host a grace period to
    /// exit and then terminates it. Repeated calls while stopping are
    /// harmless.
    pub async fn stop_host(&self, id: &str) -> Result<SessionState, BrokerError> {
        let session = self
            .session(id)
            .ok_or_else(|| BrokerError::unknown_session(id))?;

        session.begin_stop()?;
        session.shutdown_channel();

        if let Some(handle) = session.host() {
            match handle.wait_for_exit(SHUTDOWN_GRACE).await {
                Some(code) => debug!("Host of session {id} exited with {code}"),
                None => {
                    let code = self.supervisor.terminate(&handle, true).await?;
                    debug!("Host of session {id} terminated with {code}");
                }
            }
        }

        let state = match session.finish_stop() {
            Ok(state) => state,
            Err(SessionError::InvalidTransition { from, .. }) => from,
            Err(e) => return Err(e.into()),
        };

        self.remove(id);
        Ok(state)
    }

    // ============================================
    // BACKGROUND WATCHERS
    // ============================================

    /// Route supervisor exit events to the sessions bound to the process.
    fn watch_supervisor(self: &Arc<Self>) {
        let mut events = self.supervisor.subscribe();
        let broker: Weak<Self> = Arc::downgrade(self);

        TokioSpawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} supervisor events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(broker) = broker.upgrade() else {
                    break;
                };

                let SupervisorEvent::Exited {
                    handle_id,
                    pid,
                    exit_code,
                } = event;

                let bound: Vec<Arc<Session>> = broker
                    .sessions
                    .read()
                    .map(|sessions| {
                        sessions
                            .values()
                            .filter(|entry| {
                                entry
                                    .session
                                    .host()
                                    .is_some_and(|handle| handle.id() == handle_id)
                            })
                            .map(|entry| entry.session.clone())
                            .collect()
                    })
                    .unwrap_or_default();

                for session in bound {
                    debug!("Host {pid} of session {} exited ({exit_code})", session.id());
                    session.on_host_exited(exit_code);
                }
            }
        });
    }

    /// Drop a session from the table once it faults, killing its host.
    fn watch_session(self: &Arc<Self>, session: &Arc<Session>) {
        let mut state = session.subscribe_state();
        let broker: Weak<Self> = Arc::downgrade(self);
        let id = session.id().to_string();

        TokioSpawn(async move {
            let terminal = match state.wait_for(|s| s.is_terminal()).await {
                Ok(state) => *state,
                Err(_) => return,
            };
            if terminal != SessionState::Faulted {
                return;
            }

            let Some(broker) = broker.upgrade() else {
                return;
            };
            if let Some(session) = broker.remove(&id) {
                warn!(
                    "Session {id} faulted: {}",
                    session
                        .fault_reason()
                        .map(|reason| reason.to_string())
                        .unwrap_or_default()
                );
                if let Some(handle) = session.host()
                    && !handle.has_exited()
                {
                    let _ = broker.supervisor.terminate(&handle, false).await;
                }
            }
        });
    }
}
