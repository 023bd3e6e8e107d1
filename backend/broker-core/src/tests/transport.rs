use super::helpers::channel_pair;
use crate::error::transport::TransportError;
use crate::transport::{self, EndpointSpec, PIPE_SCHEME};

use bytes::Bytes;

#[test]
fn given_pipe_spec_when_parsed_then_local_pipe() {
    let endpoint = EndpointSpec::parse("pipe:/tmp/rhost-1.sock").unwrap();

    assert_eq!(endpoint, EndpointSpec::LocalPipe("/tmp/rhost-1.sock".to_string()));
    assert!(endpoint.is_local());
    assert_eq!(endpoint.to_string(), "pipe:/tmp/rhost-1.sock");
}

#[test]
fn given_ws_url_when_parsed_then_websocket() {
    let endpoint = EndpointSpec::parse("wss://host.example:5444/session").unwrap();

    assert!(matches!(endpoint, EndpointSpec::WebSocket(ref url) if url.port() == Some(5444)));
    assert!(!endpoint.is_local());
}

#[test]
fn given_unsupported_spec_when_parsed_then_invalid_endpoint() {
    for spec in ["pipe:", "http://host/", "not a url"] {
        assert!(
            matches!(
                EndpointSpec::parse(spec),
                Err(TransportError::InvalidEndpoint { .. })
            ),
            "{spec} was accepted"
        );
    }
}

#[test]
fn given_two_new_local_endpoints_when_compared_then_distinct() {
    let first = EndpointSpec::new_local();
    let second = EndpointSpec::new_local();

    assert_ne!(first, second);
    assert!(first.to_string().starts_with(PIPE_SCHEME));
}

/// **VALUE**: Frame boundaries survive the byte stream.
///
/// **BUG THIS CATCHES**: Writing frames without a length prefix, which glues
/// small frames together on the reader's side.
#[tokio::test]
async fn given_several_frames_when_sent_then_received_with_same_boundaries() {
    // GIVEN: A connected pair
    let (mut a, mut b) = channel_pair();

    // WHEN: Sending three frames, one empty
    a.send(Bytes::from_static(b"first")).await.unwrap();
    a.send(Bytes::new()).await.unwrap();
    a.send(Bytes::from(vec![9u8; 100_000])).await.unwrap();

    // THEN: Three frames arrive intact
    assert_eq!(b.receive().await.unwrap().unwrap(), Bytes::from_static(b"first"));
    assert!(b.receive().await.unwrap().unwrap().is_empty());
    assert_eq!(b.receive().await.unwrap().unwrap().len(), 100_000);
}

#[tokio::test]
async fn given_peer_closed_when_receiving_then_none_and_channel_closed() {
    let (mut a, mut b) = channel_pair();

    a.close().await.unwrap();
    drop(a);

    assert!(b.receive().await.is_none());
    assert!(b.is_closed());
    assert!(matches!(
        b.send(Bytes::from_static(b"late")).await,
        Err(TransportError::Closed { .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn given_local_listener_when_client_connects_then_frames_flow_both_ways() {
    // GIVEN: A listener on a fresh local endpoint
    let endpoint = EndpointSpec::new_local();
    let mut listener = transport::listen(&endpoint).await.unwrap();
    assert_eq!(listener.endpoint(), endpoint);

    // WHEN: A client connects
    let accept = tokio::spawn(async move {
        let mut server = listener.accept().await.unwrap();
        let frame = server.receive().await.unwrap().unwrap();
        server.send(frame).await.unwrap();
        server
    });
    let mut client = transport::connect(&endpoint, None).await.unwrap();
    client.send(Bytes::from_static(b"ping")).await.unwrap();

    // THEN: The echo comes back
    assert_eq!(
        client.receive().await.unwrap().unwrap(),
        Bytes::from_static(b"ping")
    );
    drop(accept.await.unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn given_no_listener_when_connecting_locally_then_connect_error() {
    let endpoint = EndpointSpec::new_local();

    let result = transport::connect(&endpoint, None).await;

    assert!(matches!(result, Err(TransportError::Connect { .. })));
}

#[tokio::test]
async fn given_websocket_listener_on_port_zero_when_client_connects_then_frames_flow() {
    // GIVEN: A WebSocket listener with an OS-assigned port
    let requested = EndpointSpec::parse("ws://127.0.0.1:0/").unwrap();
    let mut listener = transport::listen(&requested).await.unwrap();
    let endpoint = listener.endpoint();
    let EndpointSpec::WebSocket(url) = &endpoint else {
        panic!("expected a websocket endpoint");
    };
    assert_ne!(url.port(), Some(0));

    // WHEN: A client connects and sends a binary frame
    let accept = tokio::spawn(async move {
        let mut server = listener.accept().await.unwrap();
        let frame = server.receive().await.unwrap().unwrap();
        server.send(frame).await.unwrap();
        server
    });
    let mut client = transport::connect(&endpoint, Some("Bearer abc"))
        .await
        .unwrap();
    client.send(Bytes::from_static(&[1, 2, 3])).await.unwrap();

    // THEN: It is echoed back as one frame
    assert_eq!(
        client.receive().await.unwrap().unwrap(),
        Bytes::from_static(&[1, 2, 3])
    );
    drop(accept.await.unwrap());
}
