//! Engine-host side of a session channel.
//!
//! [`HostConnection`] is what an engine-host implementation runs after
//! accepting a channel from [`crate::transport::listen`]: it surfaces the
//! front end's requests as [`HostEvent`]s, answers them, raises notifications
//! (optionally waiting for the front end's reply), and streams blobs.

use crate::blob::{BlobChannel, BlobSettings};
use crate::error::session::SessionError;
use crate::protocol::names::{INTERRUPT, INTERRUPT_REQUEST_ID, SHUTDOWN};
use crate::protocol::{Envelope, Frame, MessageKind};
use crate::transport::Channel;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum HostEvent {
    /// A request that must be answered with [`HostConnection::respond`] or
    /// [`HostConnection::respond_error`].
    Request(Envelope),
    /// The front end wants `request_id` interrupted.
    Interrupt { request_id: u64 },
    /// The front end asked the host to exit.
    Shutdown,
    /// Any other notification.
    Notification(Envelope),
}

/// Host-side connection. Cheap to clone; events come from the receiver
/// returned by [`HostConnection::start`].
#[derive(Clone)]
pub struct HostConnection {
    inner: Arc<HostInner>,
}

struct HostInner {
    next_id: AtomicU64,
    outbound: UnboundedSender<Bytes>,
    replies: Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    blobs: BlobChannel,
    shutdown: CancellationToken,
}

impl HostConnection {
    pub fn start(channel: Channel, blobs: BlobSettings) -> (Self, UnboundedReceiver<HostEvent>) {
        let (sink, mut stream) = channel.split();
        let (outbound, mut outbound_rx) = unbounded_channel::<Bytes>();
        let (events, events_rx) = unbounded_channel();

        let inner = Arc::new(HostInner {
            next_id: AtomicU64::new(1),
            blobs: BlobChannel::new(outbound.clone(), blobs),
            outbound,
            replies: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        });

        let shutdown = inner.shutdown.clone();
        TokioSpawn(async move {
            let mut sink = sink;
            loop {
                tokio::select! {
                    biased;
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = sink.send(frame).await {
                            debug!("Host write failed: {e}");
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        while let Ok(frame) = outbound_rx.try_recv() {
                            if sink.send(frame).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });

        let reader = inner.clone();
        TokioSpawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader.shutdown.cancelled() => break,
                    next = stream.next() => next,
                };

                let frame = match next {
                    Some(Ok(bytes)) => match Frame::decode(bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!("Host received a malformed frame: {e}");
                            break;
                        }
                    },
                    Some(Err(e)) => {
                        debug!("Host channel faulted: {e}");
                        break;
                    }
                    None => break,
                };

                match frame {
                    Frame::Chunk(chunk) => reader.blobs.on_chunk(chunk),
                    Frame::Message(envelope) => {
                        if let Some(event) = reader.route(envelope)
                            && events.send(event).is_err()
                        {
                            break;
                        }
                    }
                }
            }
            trace!("Host read loop finished");
            reader.close();
        });

        (Self { inner }, events_rx)
    }

    pub fn blobs(&self) -> &BlobChannel {
        &self.inner.blobs
    }

    /// Answer `request` with a `Response`.
    pub fn respond(&self, request: &Envelope, payload: Value) -> Result<(), SessionError> {
        let id = self.inner.next_id();
        self.inner
            .write(Envelope::response(id, request.id, request.name.as_str(), payload))
    }

    /// Answer `request` with a `Response` that references blobs.
    pub fn respond_with_blobs(
        &self,
        request: &Envelope,
        payload: Value,
        blob_ids: Vec<u64>,
    ) -> Result<(), SessionError> {
        let id = self.inner.next_id();
        let response =
            Envelope::response(id, request.id, request.name.as_str(), payload).with_blobs(blob_ids);
        self.inner.write(response)
    }

    /// Answer `request` with an `Error`.
    pub fn respond_error(&self, request: &Envelope, message: &str) -> Result<(), SessionError> {
        let id = self.inner.next_id();
        self.inner
            .write(Envelope::error(id, request.id, request.name.as_str(), message))
    }

    pub fn notify(&self, name: &str, payload: Value) -> Result<(), SessionError> {
        self.notify_with_blobs(name, payload, Vec::new())
    }

    pub fn notify_with_blobs(
        &self,
        name: &str,
        payload: Value,
        blob_ids: Vec<u64>,
    ) -> Result<(), SessionError> {
        let id = self.inner.next_id();
        self.inner
            .write(Envelope::notification(id, name, payload).with_blobs(blob_ids))
    }

    /// Raise a notification and wait for the front end's reply
    /// (`ReadUserInput`, `Locator`, `ShowMessage`).
    pub async fn call(&self, name: &str, payload: Value) -> Result<Envelope, SessionError> {
        let id = self.inner.next_id();
        let (tx, rx) = oneshot::channel();

        self.inner
            .replies
            .lock()
            .map_err(|_| SessionError::terminated())?
            .insert(id, tx);

        if let Err(e) = self.inner.write(Envelope::notification(id, name, payload)) {
            if let Ok(mut replies) = self.inner.replies.lock() {
                replies.remove(&id);
            }
            return Err(e);
        }

        rx.await.map_err(|_| SessionError::terminated())
    }

    pub async fn send_blob<R>(&self, reader: R) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        Ok(self.inner.blobs.send(reader).await?)
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

impl HostInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn write(&self, envelope: Envelope) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            return Err(SessionError::terminated());
        }
        let frame = Frame::Message(envelope).encode()?;
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::terminated())
    }

    fn route(&self, envelope: Envelope) -> Option<HostEvent> {
        match envelope.kind {
            MessageKind::Request => Some(HostEvent::Request(envelope)),
            MessageKind::Response | MessageKind::Error => {
                let correlation_id = envelope.correlation_id?;
                let reply = self.replies.lock().ok()?.remove(&correlation_id);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(envelope);
                    }
                    None => debug!("Host discarding reply for unknown id {correlation_id}"),
                }
                None
            }
            MessageKind::Notification => match envelope.name.as_str() {
                INTERRUPT => envelope
                    .payload
                    .get(INTERRUPT_REQUEST_ID)
                    .and_then(Value::as_u64)
                    .map(|request_id| HostEvent::Interrupt { request_id }),
                SHUTDOWN => Some(HostEvent::Shutdown),
                _ => Some(HostEvent::Notification(envelope)),
            },
        }
    }

    fn close(&self) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.clear();
        }
        self.blobs.terminate();
        self.shutdown.cancel();
    }
}
