use broker_core::error::relay::RelayError;
use broker_core::relay::{RemoteUriRelay, RemoteUriRequest};

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn relay() -> RemoteUriRelay {
    RemoteUriRelay::new(Duration::from_secs(5)).unwrap()
}

fn get(uri: String) -> RemoteUriRequest {
    RemoteUriRequest {
        uri,
        method: "GET".to_string(),
        headers: HashMap::new(),
        content: None,
    }
}

#[tokio::test]
async fn given_reachable_target_when_relaying_get_then_status_headers_and_body_returned() {
    // GIVEN: A target serving a help page
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/help/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-engine", "4.4")
                .set_body_string("<html>help</html>"),
        )
        .mount(&server)
        .await;

    // WHEN: Relaying
    let response = relay()
        .relay(get(format!("{}/help/index.html", server.uri())))
        .await
        .unwrap();

    // THEN: Everything comes back, body base64-encoded
    assert_eq!(response.status_code, 200);
    assert_eq!(response.headers.get("x-engine").map(String::as_str), Some("4.4"));
    assert_eq!(response.decoded_content().unwrap(), b"<html>help</html>");
}

#[tokio::test]
async fn given_post_with_content_when_relaying_then_body_and_headers_forwarded() {
    // GIVEN: A target expecting a JSON body and a custom header
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(header("x-session", "s1"))
        .and(body_bytes(br#"{"a":1}"#.to_vec()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    // WHEN: Relaying a POST with base64 content and a hop-by-hop header
    let request = RemoteUriRequest {
        uri: format!("{}/api", server.uri()),
        method: "post".to_string(),
        headers: HashMap::from([
            ("x-session".to_string(), "s1".to_string()),
            ("connection".to_string(), "close".to_string()),
        ]),
        content: Some(BASE64.encode(br#"{"a":1}"#)),
    };
    let response = relay().relay(request).await.unwrap();

    // THEN: The target accepted it
    assert_eq!(response.status_code, 201);
}

/// **VALUE**: Target errors are data, not relay failures.
///
/// **WHY THIS MATTERS**: The front end has to see the target's own 404 or
/// 500 to render it; turning it into a broker 502 hides the real problem.
#[tokio::test]
async fn given_target_returns_404_when_relaying_then_status_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .mount(&server)
        .await;

    let response = relay()
        .relay(get(format!("{}/nope", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status_code, 404);
    assert_eq!(response.decoded_content().unwrap(), b"missing");
}

#[tokio::test]
async fn given_unreachable_target_when_relaying_then_bad_gateway() {
    // GIVEN: A port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let uri = format!("http://127.0.0.1:{port}/gone");

    // WHEN: Relaying
    let error = relay().relay(get(uri)).await.unwrap_err();

    // THEN: 502
    assert_eq!(error.status_code().0, 502);
}

#[tokio::test]
async fn given_slow_target_when_relay_times_out_then_gateway_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let relay = RemoteUriRelay::new(Duration::from_millis(200)).unwrap();

    let error = relay
        .relay(get(format!("{}/slow", server.uri())))
        .await
        .unwrap_err();

    assert_eq!(error.status_code().0, 504);
}

#[tokio::test]
async fn given_non_http_uri_when_relaying_then_invalid_request() {
    let error = relay()
        .relay(get("file:///etc/passwd".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(error, RelayError::InvalidRequest { .. }));
    assert_eq!(error.status_code().0, 400);
}

#[tokio::test]
async fn given_content_not_base64_when_relaying_then_invalid_request() {
    let mut request = get("http://127.0.0.1:9/".to_string());
    request.content = Some("***".to_string());

    let error = relay().relay(request).await.unwrap_err();

    assert!(matches!(error, RelayError::InvalidRequest { .. }));
}
