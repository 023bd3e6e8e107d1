//! In-memory session plumbing for unit tests.

use crate::blob::BlobSettings;
use crate::host::{HostConnection, HostEvent};
use crate::session::dispatch::{DispatchSink, InlineDispatchSink};
use crate::session::{
    FaultReason, HostCallbacks, Multiplexer, MultiplexerContext, NoopCallbacks, SessionEvent,
    SessionStateMachine,
};
use crate::transport::Channel;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

pub const PIPE_BUFFER: usize = 256 * 1024;
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Two framed channels joined back to back.
pub fn channel_pair() -> (Channel, Channel) {
    let (front, host) = tokio::io::duplex(PIPE_BUFFER);
    (
        Channel::from_stream(front, "front"),
        Channel::from_stream(host, "host"),
    )
}

pub struct Connected {
    pub mux: Multiplexer,
    pub state: Arc<SessionStateMachine>,
    pub fault: Arc<OnceLock<FaultReason>>,
    pub host: HostConnection,
    pub events: UnboundedReceiver<HostEvent>,
}

pub fn running_state() -> Arc<SessionStateMachine> {
    let state = Arc::new(SessionStateMachine::new());
    state.apply(SessionEvent::StartHost).unwrap();
    state.apply(SessionEvent::Connected).unwrap();
    state
}

pub fn connect_with(
    callbacks: Arc<dyn HostCallbacks>,
    dispatch: Arc<dyn DispatchSink>,
    interrupt_timeout: Duration,
    blobs: BlobSettings,
) -> Connected {
    let (front, host_channel) = channel_pair();
    let state = running_state();
    let fault = Arc::new(OnceLock::new());

    let mux = Multiplexer::start(
        front,
        MultiplexerContext {
            state: state.clone(),
            fault: fault.clone(),
            callbacks,
            dispatch,
            interrupt_timeout,
            blobs,
        },
    );
    let (host, events) = HostConnection::start(host_channel, blobs);

    Connected {
        mux,
        state,
        fault,
        host,
        events,
    }
}

pub fn connect() -> Connected {
    connect_with(
        Arc::new(NoopCallbacks),
        Arc::new(InlineDispatchSink),
        Duration::from_secs(5),
        BlobSettings::default(),
    )
}

pub async fn next_event(events: &mut UnboundedReceiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for host event")
        .expect("host event stream ended")
}
