//! Request/response multiplexing over one channel.
//!
//! Every outbound request gets a fresh id from a session-scoped counter and a
//! pending entry; the receive loop completes that entry from the terminal
//! frame whose `correlationId` matches. Notifications from the host are handed
//! to the callbacks through the dispatch sink in wire order.
//!
//! Tasks:
//! - **writer**: owns the sink; everything outbound goes through an unbounded
//!   queue, so sending works from any thread (including dispatch threads).
//! - **reader**: owns the stream; decodes frames, completes pending entries,
//!   routes blob chunks, dispatches notifications.
//!
//! The pending table is the only structure shared between the reader and
//! callers, behind one lock. The `closed` flag lives under that same lock so a
//! request can never be inserted after teardown drained the table.

use crate::blob::{BlobChannel, BlobSettings};
use crate::error::session::SessionError;
use crate::protocol::names::{
    INTERRUPT, INTERRUPT_REQUEST_ID, LOCATOR, PLOT, READ_USER_INPUT, SHOW_HELP, SHOW_MESSAGE,
    VIEW_OBJECT,
};
use crate::protocol::{Envelope, Frame, MessageKind};
use crate::session::callbacks::{HostCallbacks, ReadUserInputArgs, ShowHelpArgs, ShowMessageArgs};
use crate::session::dispatch::DispatchSink;
use crate::session::state::{SessionEvent, SessionState, SessionStateMachine};
use crate::session::FaultReason;
use crate::transport::{Channel, FrameSink, FrameStream};

use common::ErrorLocation;

use std::collections::HashMap;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

type Completion = oneshot::Sender<Result<Envelope, SessionError>>;

struct PendingRequest {
    name: String,
    interrupt_sent: bool,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    closed: bool,
    requests: HashMap<u64, PendingRequest>,
}

/// Everything a multiplexer needs from its session.
#[derive(Clone)]
pub struct MultiplexerContext {
    pub state: Arc<SessionStateMachine>,
    pub fault: Arc<OnceLock<FaultReason>>,
    pub callbacks: Arc<dyn HostCallbacks>,
    pub dispatch: Arc<dyn DispatchSink>,
    pub interrupt_timeout: Duration,
    pub blobs: BlobSettings,
}

/// Front-end side of a session channel. Cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    next_id: AtomicU64,
    pending: Mutex<PendingTable>,
    outbound: UnboundedSender<Bytes>,
    blobs: BlobChannel,
    context: MultiplexerContext,
    shutdown: CancellationToken,
}

/// The eventual answer to one request.
pub struct PendingResponse {
    id: u64,
    completion: oneshot::Receiver<Result<Envelope, SessionError>>,
    mux: Multiplexer,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolve with the host's `Response`, or `Remote`/`Cancelled`/
    /// `SessionTerminated`.
    pub async fn wait(self) -> Result<Envelope, SessionError> {
        flatten(self.completion.await)
    }

    /// Like [`wait`](Self::wait), but cancelling `token` interrupts the
    /// request. Still resolves (as `Cancelled`) once the host acknowledges or
    /// the interrupt timeout elapses.
    pub async fn wait_with_cancellation(
        self,
        token: &CancellationToken,
    ) -> Result<Envelope, SessionError> {
        let PendingResponse {
            id,
            mut completion,
            mux,
        } = self;

        tokio::select! {
            biased;
            result = &mut completion => flatten(result),
            _ = token.cancelled() => {
                mux.cancel(id);
                flatten(completion.await)
            }
        }
    }
}

fn flatten(
    result: Result<Result<Envelope, SessionError>, oneshot::error::RecvError>,
) -> Result<Envelope, SessionError> {
    match result {
        Ok(result) => result,
        Err(_) => Err(SessionError::terminated()),
    }
}

impl Multiplexer {
    /// Take over `channel` and start the reader and writer tasks.
    pub fn start(channel: Channel, context: MultiplexerContext) -> Self {
        let peer = channel.peer().to_string();
        let (sink, stream) = channel.split();
        let (outbound, outbound_rx) = unbounded_channel();

        let inner = Arc::new(MuxInner {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingTable::default()),
            blobs: BlobChannel::new(outbound.clone(), context.blobs),
            outbound,
            context,
            shutdown: CancellationToken::new(),
        });

        debug!("Multiplexer started on {peer}");
        TokioSpawn(write_loop(Arc::downgrade(&inner), outbound_rx, sink));
        TokioSpawn(read_loop(inner.clone(), stream));

        Self { inner }
    }

    pub fn blobs(&self) -> &BlobChannel {
        &self.inner.blobs
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .pending
            .lock()
            .map(|table| table.closed)
            .unwrap_or(true)
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .map(|table| table.requests.len())
            .unwrap_or_default()
    }

    /// Send a request. Fails synchronously, without writing, once the session
    /// is stopping or has terminated.
    pub fn send(
        &self,
        name: &str,
        payload: Value,
        blob_ids: Vec<u64>,
    ) -> Result<PendingResponse, SessionError> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut table = self
                .inner
                .pending
                .lock()
                .map_err(|_| SessionError::terminated())?;

            if table.closed || self.inner.context.state.current().rejects_requests() {
                return Err(SessionError::terminated());
            }

            let id = self.inner.next_id();
            table.requests.insert(
                id,
                PendingRequest {
                    name: name.to_string(),
                    interrupt_sent: false,
                    completion: tx,
                },
            );
            id
        };

        let envelope = Envelope::request(id, name, payload).with_blobs(blob_ids);
        if let Err(e) = self.inner.write(envelope) {
            self.inner.take_pending(id);
            return Err(e);
        }

        trace!("Request {id} '{name}' sent");
        Ok(PendingResponse {
            id,
            completion: rx,
            mux: self.clone(),
        })
    }

    /// Fire-and-forget notification to the host.
    pub fn notify(&self, name: &str, payload: Value) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::terminated());
        }
        let id = self.inner.next_id();
        self.inner.write(Envelope::notification(id, name, payload))
    }

    /// Interrupt a pending request.
    ///
    /// The first call sends one `Interrupt` notification and arms the local
    /// timeout; later calls for the same id do nothing. Returns `false` if the
    /// request is no longer pending.
    pub fn cancel(&self, request_id: u64) -> bool {
        {
            let Ok(mut table) = self.inner.pending.lock() else {
                return false;
            };
            let Some(request) = table.requests.get_mut(&request_id) else {
                return false;
            };
            if request.interrupt_sent {
                return true;
            }
            request.interrupt_sent = true;
            debug!("Cancelling request {request_id} '{}'", request.name);
        }

        let id = self.inner.next_id();
        let interrupt = Envelope::notification(id, INTERRUPT, json!({ INTERRUPT_REQUEST_ID: request_id }));
        if let Err(e) = self.inner.write(interrupt) {
            debug!("Interrupt for request {request_id} not sent: {e}");
        }

        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.context.interrupt_timeout;
        TokioSpawn(async move {
            sleep(timeout).await;
            if let Some(inner) = weak.upgrade()
                && let Some(request) = inner.take_pending(request_id)
            {
                debug!("Interrupt of request {request_id} timed out");
                let _ = request.completion.send(Err(SessionError::cancelled(request_id)));
            }
        });

        true
    }

    /// Record a fault and tear down. The first recorded reason wins.
    pub fn fault(&self, reason: FaultReason) {
        self.inner.fault(reason);
    }

    /// Orderly teardown: flush queued frames, close the channel, fail whatever
    /// is still pending.
    pub fn close(&self) {
        self.inner.teardown();
    }
}

impl MuxInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn write(&self, envelope: Envelope) -> Result<(), SessionError> {
        let frame = Frame::Message(envelope).encode()?;
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::terminated())
    }

    fn take_pending(&self, id: u64) -> Option<PendingRequest> {
        self.pending.lock().ok()?.requests.remove(&id)
    }

    fn fault(&self, reason: FaultReason) {
        let state = self.context.state.current();
        if state.is_terminal() || self.is_closed() {
            trace!("Ignoring fault after close: {reason}");
            self.teardown();
            return;
        }

        warn!("Session fault: {reason}");
        let _ = self.context.fault.set(reason);

        if state != SessionState::Stopping
            && let Err(e) = self.context.state.apply(SessionEvent::HostDisconnected)
        {
            debug!("HostDisconnected not applied: {e}");
        }

        self.teardown();
    }

    fn is_closed(&self) -> bool {
        self.pending.lock().map(|t| t.closed).unwrap_or(true)
    }

    fn teardown(&self) {
        let drained: Vec<PendingRequest> = match self.pending.lock() {
            Ok(mut table) => {
                table.closed = true;
                table.requests.drain().map(|(_, request)| request).collect()
            }
            Err(_) => Vec::new(),
        };

        if !drained.is_empty() {
            debug!("Failing {} pending requests", drained.len());
        }
        for request in drained {
            let _ = request.completion.send(Err(SessionError::terminated()));
        }

        self.blobs.terminate();
        self.shutdown.cancel();
    }

    fn on_terminal(&self, envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id else {
            return;
        };

        let Some(request) = self.take_pending(correlation_id) else {
            debug!(
                "Discarding {:?} for unknown request {correlation_id}",
                envelope.kind
            );
            return;
        };

        let result = if request.interrupt_sent {
            Err(SessionError::cancelled(correlation_id))
        } else if envelope.kind == MessageKind::Error {
            Err(SessionError::Remote {
                request_id: correlation_id,
                name: request.name,
                message: envelope.error_message(),
                location: ErrorLocation::from(Location::caller()),
            })
        } else {
            Ok(envelope)
        };

        let _ = request.completion.send(result);
    }

    fn on_notification(self: &Arc<Self>, envelope: Envelope) {
        let callbacks = self.context.callbacks.clone();
        let mux = Arc::downgrade(self);
        self.context
            .dispatch
            .post(Box::new(move || dispatch_notification(&*callbacks, &mux, envelope)));
    }
}

fn reply(mux: &Weak<MuxInner>, notification: &Envelope, payload: Value) {
    let Some(inner) = mux.upgrade() else {
        return;
    };
    if inner.is_closed() {
        debug!("Session closed before reply to '{}'", notification.name);
        return;
    }

    let id = inner.next_id();
    let response = Envelope::response(id, notification.id, notification.name.as_str(), payload);
    if let Err(e) = inner.write(response) {
        debug!("Reply to '{}' not sent: {e}", notification.name);
    }
}

fn dispatch_notification(callbacks: &dyn HostCallbacks, mux: &Weak<MuxInner>, envelope: Envelope) {
    trace!("Dispatching '{}' ({})", envelope.name, envelope.id);

    match envelope.name.as_str() {
        PLOT => callbacks.plot(&envelope.payload, &envelope.blob_ids),
        VIEW_OBJECT => callbacks.view_object(&envelope.payload),
        SHOW_HELP => match ShowHelpArgs::deserialize(&envelope.payload) {
            Ok(args) => callbacks.show_help(&args.url),
            Err(e) => warn!("Malformed {SHOW_HELP} payload: {e}"),
        },
        READ_USER_INPUT => {
            let args = ReadUserInputArgs::deserialize(&envelope.payload).unwrap_or(
                ReadUserInputArgs {
                    prompt: String::new(),
                    max_length: 0,
                },
            );
            let input = callbacks.read_user_input(&args.prompt, args.max_length);
            reply(mux, &envelope, json!({ "input": input }));
        }
        LOCATOR => {
            let result = callbacks.locator();
            reply(mux, &envelope, json!(result));
        }
        SHOW_MESSAGE => {
            let args = ShowMessageArgs::deserialize(&envelope.payload).unwrap_or(ShowMessageArgs {
                message: envelope.payload.to_string(),
                buttons: Default::default(),
            });
            let answer = callbacks.show_message(&args.message, args.buttons);
            reply(mux, &envelope, json!({ "answer": answer }));
        }
        other => callbacks.notification(other, &envelope.payload),
    }
}

async fn read_loop(inner: Arc<MuxInner>, mut stream: FrameStream) {
    loop {
        let next = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => match Frame::decode(bytes) {
                Ok(Frame::Message(envelope)) => match envelope.kind {
                    MessageKind::Response | MessageKind::Error => inner.on_terminal(envelope),
                    MessageKind::Notification | MessageKind::Request => {
                        inner.on_notification(envelope)
                    }
                },
                Ok(Frame::Chunk(chunk)) => inner.blobs.on_chunk(chunk),
                Err(e) => {
                    inner.fault(FaultReason::Protocol(e.to_string()));
                    break;
                }
            },
            Some(Err(e)) => {
                inner.fault(FaultReason::Transport(e.to_string()));
                break;
            }
            None => {
                inner.fault(FaultReason::Transport(String::from(
                    "channel closed by the engine-host",
                )));
                break;
            }
        }
    }
    trace!("Multiplexer read loop finished");
}

async fn write_loop(inner: Weak<MuxInner>, mut outbound: UnboundedReceiver<Bytes>, mut sink: FrameSink) {
    let Some(shutdown) = inner.upgrade().map(|i| i.shutdown.clone()) else {
        return;
    };

    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    if let Some(inner) = inner.upgrade() {
                        inner.fault(FaultReason::Transport(e.to_string()));
                    }
                    break;
                }
            }
            _ = shutdown.cancelled() => {
                while let Ok(frame) = outbound.try_recv() {
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = sink.close().await {
        trace!("Closing sink: {e}");
    }
    trace!("Multiplexer write loop finished");
}

