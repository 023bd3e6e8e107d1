use crate::helpers::{TEST_SECRET, TEST_USER, credentials, new_broker, test_config};

use broker_core::broker::server::{BrokerServer, start_server};
use broker_core::config::BrokerConfig;
use broker_core::relay::{RemoteUriRelay, RemoteUriResponse};

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    server: BrokerServer,
    base: String,
    client: reqwest::Client,
    _dir: TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn start(config: BrokerConfig, dir: TempDir) -> Harness {
    let broker = new_broker(config, dir.path());
    let relay = RemoteUriRelay::new(Duration::from_secs(5)).unwrap();
    let server = start_server(broker, relay, "127.0.0.1", 0)
        .await
        .expect("Failed to start broker server");
    let base = format!("http://{}", server.local_addr());

    Harness {
        server,
        base,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

fn basic() -> String {
    credentials().to_basic_header()
}

#[tokio::test]
async fn given_no_authorization_when_listing_sessions_then_401_with_challenge() {
    // GIVEN: A running broker
    let harness = start(test_config(None), TempDir::new().unwrap()).await;

    // WHEN: Calling without credentials
    let response = harness
        .client
        .get(harness.url("/sessions"))
        .send()
        .await
        .unwrap();

    // THEN: 401, a Basic challenge and a reason code
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
    assert_eq!(body["reason"], "invalid_credentials");

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_wrong_secret_when_creating_session_then_401_and_nothing_created() {
    let harness = start(test_config(None), TempDir::new().unwrap()).await;
    let bad = broker_core::auth::Credentials::new(TEST_USER, "wrong").to_basic_header();

    let response = harness
        .client
        .put(harness.url("/sessions/s1"))
        .header(AUTHORIZATION, bad)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let listed: Vec<Value> = harness
        .client
        .get(harness.url("/sessions"))
        .header(AUTHORIZATION, basic())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_unknown_bearer_token_when_listing_then_401_expired() {
    let harness = start(test_config(None), TempDir::new().unwrap()).await;

    let response = harness
        .client
        .get(harness.url("/sessions"))
        .header(AUTHORIZATION, format!("Bearer {}", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "expired");

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_unknown_session_when_deleting_then_404() {
    let harness = start(test_config(None), TempDir::new().unwrap()).await;

    let response = harness
        .client
        .delete(harness.url("/sessions/nope"))
        .header(AUTHORIZATION, basic())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_no_host_installed_when_creating_session_then_500_and_session_gone() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("R.Host");
    let harness = start(test_config(Some(missing)), dir).await;

    let response = harness
        .client
        .put(harness.url("/sessions/s1"))
        .header(AUTHORIZATION, basic())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_reachable_target_when_posting_remote_uri_then_relayed_response_returned() {
    // GIVEN: A target answering 202 with a body
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(202).set_body_string("relayed"))
        .mount(&target)
        .await;
    let harness = start(test_config(None), TempDir::new().unwrap()).await;

    // WHEN: Posting a relay request
    let response = harness
        .client
        .post(harness.url("/remoteuri"))
        .header(AUTHORIZATION, basic())
        .json(&json!({ "uri": format!("{}/page", target.uri()) }))
        .send()
        .await
        .unwrap();

    // THEN: The broker answers 200 with the target's response inside
    assert_eq!(response.status(), StatusCode::OK);
    let relayed: RemoteUriResponse = response.json().await.unwrap();
    assert_eq!(relayed.status_code, 202);
    assert_eq!(relayed.decoded_content().unwrap(), b"relayed");

    harness.server.shutdown().await;
}

#[tokio::test]
async fn given_unreachable_target_when_posting_remote_uri_then_502() {
    let harness = start(test_config(None), TempDir::new().unwrap()).await;
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let response = harness
        .client
        .post(harness.url("/remoteuri"))
        .header(AUTHORIZATION, basic())
        .json(&json!({ "uri": format!("http://127.0.0.1:{port}/") }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let relayed: RemoteUriResponse = response.json().await.unwrap();
    assert_eq!(relayed.status_code, 502);

    harness.server.shutdown().await;
}

/// Echo server standing in for a service next to a remote engine-host.
async fn spawn_echo_websocket() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
            if ws.send(message).await.is_err() {
                break;
            }
        }
    });
    port
}

/// **VALUE**: The WebSocket relay carries frames both ways.
///
/// **BUG THIS CATCHES**: Accepting the upgrade but pumping only one
/// direction, which makes interactive help and graphics pages hang.
#[tokio::test]
async fn given_echo_target_when_relaying_websocket_then_messages_round_trip() {
    // GIVEN: An echo target and a running broker
    let port = spawn_echo_websocket().await;
    let harness = start(test_config(None), TempDir::new().unwrap()).await;

    // WHEN: Opening a relayed socket
    let url = format!(
        "ws://{}/remoteuri?uri=ws://127.0.0.1:{port}/",
        harness.server.local_addr()
    );
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert(AUTHORIZATION, HeaderValue::from_str(&basic()).unwrap());
    let (mut ws, _) = connect_async(request).await.unwrap();

    // THEN: Text and binary messages come back unchanged
    ws.send(Message::Text("hello".into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.into_text().unwrap().as_str(), "hello");

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed.into_data().to_vec(), vec![1u8, 2, 3]);

    let _ = ws.close(None).await;
    harness.server.shutdown().await;
}

#[cfg(unix)]
mod with_host_process {
    use super::{basic, start};
    use crate::helpers::{spawn_stub_host, test_config, wait_until, write_host_script};

    use broker_core::auth::Credentials;
    use broker_core::broker::server::CreateSessionResponse;
    use broker_core::config::{AccountConfig, BrokerConfig};
    use broker_core::transport::EndpointSpec;

    use common::RedactedSecret;

    use reqwest::StatusCode;
    use reqwest::header::AUTHORIZATION;
    use serde_json::Value;
    use tempfile::TempDir;

    fn config_with_bob(host_path: std::path::PathBuf) -> BrokerConfig {
        let mut config = test_config(Some(host_path));
        config.auth.accounts.push(AccountConfig {
            user: "bob".to_string(),
            secret: RedactedSecret::new("hunter2"),
            expires_at: None,
        });
        config
    }

    /// **VALUE**: The HTTP surface drives the whole session lifecycle and
    /// enforces ownership.
    #[tokio::test]
    async fn given_authorized_caller_when_creating_listing_and_deleting_then_lifecycle_completes() {
        // GIVEN: A host script reporting a stub host
        let dir = TempDir::new().unwrap();
        let stub = spawn_stub_host(&EndpointSpec::new_local()).await;
        let script = write_host_script(
            dir.path(),
            &format!("echo 'listening on {}'\nexec sleep 30", stub.endpoint),
        );
        let harness = start(config_with_bob(script), dir).await;

        // WHEN: Creating a session
        let response = harness
            .client
            .put(harness.url("/sessions/s1"))
            .header(AUTHORIZATION, basic())
            .send()
            .await
            .unwrap();

        // THEN: 201 with a Running summary and a bearer token
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreateSessionResponse = response.json().await.unwrap();
        assert_eq!(created.session.id, "s1");
        assert_eq!(created.session.state, "Running");
        assert!(created.session.host.is_some());
        let bearer = format!("Bearer {}", created.token);

        // AND: The bearer token lists the session
        let listed: Vec<Value> = harness
            .client
            .get(harness.url("/sessions"))
            .header(AUTHORIZATION, bearer.as_str())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], "s1");

        // AND: Another user can neither see nor delete it
        let bob = Credentials::new("bob", "hunter2").to_basic_header();
        let bobs: Vec<Value> = harness
            .client
            .get(harness.url("/sessions"))
            .header(AUTHORIZATION, bob.as_str())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(bobs.is_empty());
        let forbidden = harness
            .client
            .delete(harness.url("/sessions/s1"))
            .header(AUTHORIZATION, bob.as_str())
            .send()
            .await
            .unwrap();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        // WHEN: The owner deletes it
        let deleted = harness
            .client
            .delete(harness.url("/sessions/s1"))
            .header(AUTHORIZATION, bearer.as_str())
            .send()
            .await
            .unwrap();

        // THEN: Stopped, and the host got its Shutdown
        assert_eq!(deleted.status(), StatusCode::OK);
        let body: Value = deleted.json().await.unwrap();
        assert_eq!(body["state"], "Stopped");
        assert!(wait_until(|| stub.shutdown_count() == 1).await);

        harness.server.shutdown().await;
    }
}

#[test]
fn given_test_account_when_encoded_then_basic_header_uses_secret() {
    let header = basic();
    let parsed = broker_core::auth::Credentials::from_basic_header(&header).unwrap();

    assert_eq!(parsed.user, TEST_USER);
    assert_eq!(parsed.secret.expose(), TEST_SECRET);
}
