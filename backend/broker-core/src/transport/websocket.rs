//! Remote carrier: one binary WebSocket message per frame.

use crate::error::transport::TransportError;
use crate::transport::Channel;

use common::ErrorLocation;

use std::future;
use std::panic::Location;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use url::Url;

/// Wrap an established WebSocket as a frame channel.
///
/// Text messages are accepted as frames too; control messages are consumed.
pub fn channel<S>(ws: WebSocketStream<S>, peer: impl Into<String>) -> Channel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink
        .sink_map_err(TransportError::from)
        .with(|frame: Bytes| future::ready(Ok::<_, TransportError>(Message::Binary(frame))));

    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Binary(data)) => Some(Ok(data)),
            Ok(Message::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
            Ok(Message::Close(frame)) => {
                trace!("WebSocket close frame received: {frame:?}");
                None
            }
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::from(e))),
        })
    });

    Channel::from_parts(Box::pin(sink), Box::pin(stream), peer)
}

pub async fn connect(url: &Url, authorization: Option<&str>) -> Result<Channel, TransportError> {
    let connect_error = |message: String| TransportError::Connect {
        endpoint: url.to_string(),
        message,
        location: ErrorLocation::from(Location::caller()),
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| connect_error(e.to_string()))?;

    if let Some(value) = authorization {
        let header =
            HeaderValue::from_str(value).map_err(|e| connect_error(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);
    }

    let (ws, response) = connect_async(request)
        .await
        .map_err(|e| connect_error(e.to_string()))?;
    debug!("WebSocket connected to {url} (HTTP {})", response.status());

    Ok(channel(ws, url.to_string()))
}

pub struct WebSocketListener {
    url: Url,
    listener: TcpListener,
}

impl WebSocketListener {
    pub async fn bind(url: &Url) -> Result<Self, TransportError> {
        let bind_error = |message: String| TransportError::Bind {
            endpoint: url.to_string(),
            message,
            location: ErrorLocation::from(Location::caller()),
        };

        let host = url
            .host_str()
            .ok_or_else(|| bind_error(String::from("URL has no host")))?;
        let port = url.port_or_known_default().unwrap_or(0);

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| bind_error(e.to_string()))?;
        let bound = listener
            .local_addr()
            .map_err(|e| bind_error(e.to_string()))?;

        let mut url = url.clone();
        url.set_port(Some(bound.port()))
            .map_err(|()| bind_error(String::from("URL cannot carry a port")))?;

        info!("Listening for WebSocket connections on {url}");
        Ok(Self { url, listener })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn accept(&mut self) -> Result<Channel, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        let ws = accept_async(stream).await?;
        debug!("Accepted WebSocket connection from {peer}");
        Ok(channel(ws, peer.to_string()))
    }
}
