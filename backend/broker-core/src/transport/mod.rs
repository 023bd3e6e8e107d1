//! Framed, bidirectional channels between a front end and an engine-host.
//!
//! Two carriers share one [`Channel`] type:
//!
//! - **Local**: unix domain socket / Windows named pipe, length-prefixed frames
//!   ([`LengthDelimitedCodec`]).
//! - **WebSocket**: one binary message per frame, used for remote sessions.
//!
//! Frame boundaries are preserved by both, so the session layer never
//! reassembles partial envelopes. A read or write failure closes the channel
//! and surfaces as [`TransportError::Fault`]; nothing here retries.

pub mod local;
pub mod websocket;

use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::panic::Location;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use url::Url;
use uuid::Uuid;

/// Scheme prefix of a local endpoint spec (`pipe:<name>`).
pub const PIPE_SCHEME: &str = "pipe:";

/// Largest frame accepted from a local stream.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

const LOCAL_NAME_PREFIX: &str = "rhost-";

pub type FrameSink = Pin<Box<dyn Sink<Bytes, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Where an engine-host listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    /// Unix socket path or Windows pipe name.
    LocalPipe(String),
    /// `ws://` or `wss://` URL.
    WebSocket(Url),
}

impl EndpointSpec {
    /// A fresh, unique local endpoint for a new host process.
    pub fn new_local() -> Self {
        let name = format!("{LOCAL_NAME_PREFIX}{}", Uuid::new_v4().simple());
        EndpointSpec::LocalPipe(local::platform_pipe_name(&name))
    }

    #[track_caller]
    pub fn parse(spec: &str) -> Result<Self, TransportError> {
        if let Some(name) = spec.strip_prefix(PIPE_SCHEME) {
            if name.is_empty() {
                return Err(TransportError::InvalidEndpoint {
                    endpoint: spec.to_string(),
                    message: String::from("pipe name is empty"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            return Ok(EndpointSpec::LocalPipe(name.to_string()));
        }

        let url = Url::parse(spec).map_err(|e| TransportError::InvalidEndpoint {
            endpoint: spec.to_string(),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        match url.scheme() {
            "ws" | "wss" => Ok(EndpointSpec::WebSocket(url)),
            other => Err(TransportError::InvalidEndpoint {
                endpoint: spec.to_string(),
                message: format!("unsupported scheme '{other}'"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, EndpointSpec::LocalPipe(_))
    }
}

impl Display for EndpointSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            EndpointSpec::LocalPipe(name) => write!(f, "{PIPE_SCHEME}{name}"),
            EndpointSpec::WebSocket(url) => write!(f, "{url}"),
        }
    }
}

/// A connected, framed channel.
///
/// `receive` yields frames until the peer closes (`None`) or the channel
/// faults (`Some(Err(..))`); after either, the channel is closed for good.
pub struct Channel {
    sink: FrameSink,
    stream: FrameStream,
    peer: String,
    closed: bool,
}

impl Channel {
    pub fn from_parts(sink: FrameSink, stream: FrameStream, peer: impl Into<String>) -> Self {
        Self {
            sink,
            stream,
            peer: peer.into(),
            closed: false,
        }
    }

    /// Length-prefixed framing over any byte stream.
    pub fn from_stream<S>(io: S, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_LENGTH)
            .new_codec();
        let (sink, stream) = Framed::new(io, codec).split();

        let sink = sink.sink_map_err(TransportError::from);
        let stream = stream.map(|frame| {
            frame
                .map(BytesMut::freeze)
                .map_err(TransportError::from)
        });

        Self::from_parts(Box::pin(sink), Box::pin(stream), peer)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::closed());
        }
        trace!("-> {} ({} bytes)", self.peer, frame.len());
        let result = self.sink.send(frame).await;
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    pub async fn receive(&mut self) -> Option<Result<Bytes, TransportError>> {
        if self.closed {
            return None;
        }
        let next = self.stream.next().await;
        match &next {
            Some(Ok(frame)) => trace!("<- {} ({} bytes)", self.peer, frame.len()),
            Some(Err(e)) => {
                debug!("Channel {} faulted: {e}", self.peer);
                self.closed = true;
            }
            None => {
                debug!("Channel {} closed by peer", self.peer);
                self.closed = true;
            }
        }
        next
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await
    }

    /// Separate halves for a dedicated reader and writer task.
    pub fn split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

/// Connect to an engine-host endpoint.
///
/// `authorization` is sent as the `Authorization` header on WebSocket
/// endpoints and ignored for local ones (same-machine access is governed by
/// the socket/pipe ACL).
pub async fn connect(
    endpoint: &EndpointSpec,
    authorization: Option<&str>,
) -> Result<Channel, TransportError> {
    debug!("Connecting to {endpoint}");
    match endpoint {
        EndpointSpec::LocalPipe(name) => local::connect(name).await,
        EndpointSpec::WebSocket(url) => websocket::connect(url, authorization).await,
    }
}

/// Listening side, used by engine-host implementations.
pub enum Listener {
    Local(local::LocalListener),
    WebSocket(websocket::WebSocketListener),
}

impl Listener {
    /// The endpoint clients should connect to (with the bound port filled in
    /// for WebSocket listeners bound to port 0).
    pub fn endpoint(&self) -> EndpointSpec {
        match self {
            Listener::Local(listener) => EndpointSpec::LocalPipe(listener.name().to_string()),
            Listener::WebSocket(listener) => EndpointSpec::WebSocket(listener.url().clone()),
        }
    }

    pub async fn accept(&mut self) -> Result<Channel, TransportError> {
        match self {
            Listener::Local(listener) => listener.accept().await,
            Listener::WebSocket(listener) => listener.accept().await,
        }
    }
}

pub async fn listen(endpoint: &EndpointSpec) -> Result<Listener, TransportError> {
    match endpoint {
        EndpointSpec::LocalPipe(name) => Ok(Listener::Local(local::LocalListener::bind(name)?)),
        EndpointSpec::WebSocket(url) => Ok(Listener::WebSocket(
            websocket::WebSocketListener::bind(url).await?,
        )),
    }
}
