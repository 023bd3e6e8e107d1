//! WebSocket relay: connect outbound first, then pump both directions.

use crate::error::relay::RelayError;

use common::{ErrorLocation, HttpStatusCode};

use std::panic::Location;

use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub type OutboundSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An established outbound leg, plus the subprotocol the target selected.
pub struct OutboundConnection {
    pub socket: OutboundSocket,
    pub protocol: Option<String>,
}

fn websocket_url(uri: &str) -> Result<Url, RelayError> {
    let mut url = Url::parse(uri)
        .map_err(|e| RelayError::invalid_request(format!("invalid uri '{uri}': {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(RelayError::invalid_request(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| RelayError::invalid_request(format!("cannot relay '{uri}'")))?;
    Ok(url)
}

/// Open the outbound WebSocket, offering `subprotocols`.
pub async fn connect_outbound(
    uri: &str,
    subprotocols: &[String],
) -> Result<OutboundConnection, RelayError> {
    let url = websocket_url(uri)?;
    let outbound_error = |message: String| RelayError::Outbound {
        message,
        status: HttpStatusCode::BAD_GATEWAY,
        location: ErrorLocation::from(Location::caller()),
    };

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::invalid_request(e.to_string()))?;

    if !subprotocols.is_empty() {
        let offered = HeaderValue::from_str(&subprotocols.join(", "))
            .map_err(|e| RelayError::invalid_request(format!("invalid subprotocol: {e}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offered);
    }

    debug!("Relaying WebSocket to {url}");
    let (socket, response) = connect_async(request)
        .await
        .map_err(|e| outbound_error(format!("WebSocket connect to {url} failed: {e}")))?;

    let protocol = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok(OutboundConnection { socket, protocol })
}

fn to_outbound(message: AxumMessage) -> Message {
    match message {
        AxumMessage::Text(text) => Message::Text(text.as_str().to_string().into()),
        AxumMessage::Binary(data) => Message::Binary(data),
        AxumMessage::Ping(data) => Message::Ping(data),
        AxumMessage::Pong(data) => Message::Pong(data),
        AxumMessage::Close(frame) => Message::Close(frame.map(|frame| CloseFrame {
            code: CloseCode::from(frame.code),
            reason: frame.reason.as_str().to_string().into(),
        })),
    }
}

fn to_inbound(message: Message) -> Option<AxumMessage> {
    match message {
        Message::Text(text) => Some(AxumMessage::Text(text.as_str().to_string().into())),
        Message::Binary(data) => Some(AxumMessage::Binary(data)),
        Message::Ping(data) => Some(AxumMessage::Ping(data)),
        Message::Pong(data) => Some(AxumMessage::Pong(data)),
        Message::Close(frame) => Some(AxumMessage::Close(frame.map(|frame| AxumCloseFrame {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_string().into(),
        }))),
        Message::Frame(_) => None,
    }
}

/// Pump messages between the inbound socket and the outbound leg until
/// either side closes.
pub async fn relay_websocket(inbound: WebSocket, outbound: OutboundConnection) {
    let (mut inbound_tx, mut inbound_rx) = inbound.split();
    let (mut outbound_tx, mut outbound_rx) = outbound.socket.split();

    let upstream = async {
        while let Some(Ok(message)) = inbound_rx.next().await {
            let closing = matches!(message, AxumMessage::Close(_));
            if outbound_tx.send(to_outbound(message)).await.is_err() || closing {
                break;
            }
        }
        let _ = outbound_tx.close().await;
    };

    let downstream = async {
        while let Some(Ok(message)) = outbound_rx.next().await {
            let closing = matches!(message, Message::Close(_));
            if let Some(message) = to_inbound(message)
                && inbound_tx.send(message).await.is_err()
            {
                break;
            }
            if closing {
                break;
            }
        }
        let _ = inbound_tx.close().await;
    };

    tokio::select! {
        _ = upstream => trace!("Relay upstream finished"),
        _ = downstream => trace!("Relay downstream finished"),
    }
    debug!("WebSocket relay closed");
}
