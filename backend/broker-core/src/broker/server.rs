//! Broker HTTP surface.
//!
//! - `PUT /sessions/{name}`: create and start a session for the caller
//! - `GET /sessions`: the caller's sessions
//! - `DELETE /sessions/{name}`: stop a session's host
//! - `POST /remoteuri`: relay one HTTP request
//! - `GET /remoteuri?uri=...` + WebSocket upgrade: relay a socket
//!
//! Every route requires `Authorization: Basic ...` or the `Bearer <token>`
//! returned by `PUT /sessions/{name}`.

use crate::auth::{AuthToken, Credentials};
use crate::broker::{Broker, SessionOptions};
use crate::error::auth::AuthFailure;
use crate::error::broker::BrokerError;
use crate::error::transport::TransportError;
use crate::relay::websocket::{connect_outbound, relay_websocket};
use crate::relay::{RemoteUriRelay, RemoteUriRequest, RemoteUriResponse};

use common::ErrorLocation;
use models::SessionSummary;

use std::net::SocketAddr;
use std::panic::Location;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::spawn as TokioSpawn;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const REALM: &str = "Basic realm=\"rhost-broker\"";

#[derive(Clone)]
struct AppState {
    broker: Arc<Broker>,
    relay: Arc<RemoteUriRelay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session: SessionSummary,
    /// Bearer token for later calls.
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct RemoteUriQuery {
    uri: String,
}

/// Error body: `{ "error": ..., "reason": ... }`.
struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(error: BrokerError) -> Self {
        ApiError(error)
    }
}

impl From<AuthFailure> for ApiError {
    fn from(error: AuthFailure) -> Self {
        ApiError(BrokerError::Auth(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code().0)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &self.0 {
            BrokerError::Auth(failure) => {
                debug!("Rejected request: {failure}");
                let body = Json(json!({ "error": "unauthorized", "reason": failure.reason() }));
                if status == StatusCode::UNAUTHORIZED {
                    (status, [(WWW_AUTHENTICATE, REALM)], body).into_response()
                } else {
                    (status, body).into_response()
                }
            }
            other => {
                error!("Request failed: {other}");
                (status, Json(json!({ "error": other.to_string() }))).into_response()
            }
        }
    }
}

fn authorize(broker: &Broker, headers: &HeaderMap) -> Result<AuthToken, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AuthFailure::invalid_credentials(""))?;

    if let Some(id) = AuthToken::parse_bearer_header(value) {
        return broker
            .resolve_token(&id)
            .ok_or_else(|| AuthFailure::expired("").into());
    }

    let credentials =
        Credentials::from_basic_header(value).ok_or_else(|| AuthFailure::invalid_credentials(""))?;
    Ok(broker.authenticate(&credentials)?)
}

fn owned_by(token: &AuthToken, summary_user: &str, id: &str) -> Result<(), ApiError> {
    if token.user == summary_user {
        Ok(())
    } else {
        Err(AuthFailure::policy_denied(
            token.user.as_str(),
            format!("session '{id}' belongs to another user"),
        )
        .into())
    }
}

async fn put_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let token = authorize(&state.broker, &headers)?;
    let session = state
        .broker
        .open_session(&token, Some(&name), SessionOptions::default())?;

    // A client that disconnects mid-start cancels the launch
    let cancel = CancellationToken::new();
    let disconnect = cancel.clone().drop_guard();
    state.broker.start_host(session.id(), &cancel).await?;
    disconnect.disarm();

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session: session.summary(),
            token: token.id.to_string(),
        }),
    ))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    let token = authorize(&state.broker, &headers)?;
    let sessions = state
        .broker
        .sessions()
        .into_iter()
        .filter(|summary| summary.user == token.user)
        .collect();
    Ok(Json(sessions))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = authorize(&state.broker, &headers)?;
    let session = state
        .broker
        .session(&name)
        .ok_or_else(|| BrokerError::unknown_session(&name))?;
    owned_by(&token, session.user(), &name)?;

    let stopped = state.broker.stop_host(&name).await?;
    Ok(Json(json!({ "id": name, "state": stopped.to_string() })))
}

async fn post_remote_uri(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RemoteUriRequest>,
) -> Result<Response, ApiError> {
    authorize(&state.broker, &headers)?;

    let response = match state.relay.relay(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code().0).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(RemoteUriResponse::from_error(&e))).into_response()
        }
    };
    Ok(response)
}

async fn get_remote_uri(
    State(state): State<AppState>,
    Query(query): Query<RemoteUriQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    authorize(&state.broker, &headers)?;

    let subprotocols: Vec<String> = headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|protocol| protocol.trim().to_string())
        .filter(|protocol| !protocol.is_empty())
        .collect();

    // The outbound leg is established before the upgrade is accepted so a
    // failure can still be reported as a status code.
    let outbound = match connect_outbound(&query.uri, &subprotocols).await {
        Ok(outbound) => outbound,
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code().0).unwrap_or(StatusCode::BAD_GATEWAY);
            return Ok((status, e.to_string()).into_response());
        }
    };

    let upgrade = match &outbound.protocol {
        Some(protocol) => upgrade.protocols([protocol.clone()]),
        None => upgrade,
    };

    Ok(upgrade.on_upgrade(move |socket| relay_websocket(socket, outbound)))
}

pub fn router(broker: Arc<Broker>, relay: RemoteUriRelay) -> Router {
    let state = AppState {
        broker,
        relay: Arc::new(relay),
    };

    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{name}", put(put_session).delete(delete_session))
        .route("/remoteuri", get(get_remote_uri).post(post_remote_uri))
        .with_state(state)
}

/// A running HTTP surface.
pub struct BrokerServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl BrokerServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!("HTTP server task failed: {e}");
        }
    }
}

/// Bind `address:port` and serve the broker routes in the background.
pub async fn start_server(
    broker: Arc<Broker>,
    relay: RemoteUriRelay,
    address: &str,
    port: u16,
) -> Result<BrokerServer, BrokerError> {
    let listener = TcpListener::bind((address, port))
        .await
        .map_err(|e| TransportError::Bind {
            endpoint: format!("{address}:{port}"),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;
    let local_addr = listener.local_addr().map_err(TransportError::from)?;

    info!("Broker listening on http://{local_addr}");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let app = router(broker, relay);

    let task = TokioSpawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            token.cancelled().await;
        });
        if let Err(e) = serve.await {
            error!("HTTP server error: {e}");
        }
    });

    Ok(BrokerServer {
        local_addr,
        shutdown,
        task,
    })
}
