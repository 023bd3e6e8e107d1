use crate::error::protocol::ProtocolError;
use crate::protocol::{BlobChunk, Envelope, Frame, MessageKind};

use bytes::Bytes;
use serde_json::json;

#[test]
fn given_response_envelope_when_encoded_then_tag_and_camel_case_fields_on_wire() {
    // GIVEN: A response with a correlation id and blob ids
    let envelope = Envelope::response(7, 3, "evaluate", json!({ "value": 2 })).with_blobs(vec![1]);

    // WHEN: Encoding
    let bytes = Frame::Message(envelope).encode().unwrap();

    // THEN: First byte is the envelope tag, the rest is camelCase JSON
    assert_eq!(bytes[0], 0x01);
    let json: serde_json::Value = serde_json::from_slice(&bytes[1..]).unwrap();
    assert_eq!(json["correlationId"], 3);
    assert_eq!(json["kind"], "Response");
    assert_eq!(json["blobIds"], json!([1]));
}

#[test]
fn given_request_envelope_when_encoded_then_optional_fields_omitted() {
    let bytes = Frame::Message(Envelope::request(1, "evaluate", json!({})))
        .encode()
        .unwrap();

    let json: serde_json::Value = serde_json::from_slice(&bytes[1..]).unwrap();
    assert!(json.get("correlationId").is_none());
    assert!(json.get("blobIds").is_none());
}

/// **VALUE**: Verifies the fixed binary chunk header layout.
///
/// **WHY THIS MATTERS**: The engine-host decodes this header independently;
/// a byte-order or offset slip silently corrupts every plot.
#[test]
fn given_last_chunk_when_encoded_then_big_endian_header_and_last_flag() {
    // GIVEN: A final chunk of blob 258, sequence 1
    let chunk = BlobChunk {
        blob_id: 258,
        seq: 1,
        last: true,
        data: Bytes::from_static(b"abc"),
    };

    // WHEN: Encoding
    let bytes = Frame::Chunk(chunk.clone()).encode().unwrap();

    // THEN: tag | id BE | seq BE | flags | data
    let mut expected = vec![0x02];
    expected.extend_from_slice(&258u64.to_be_bytes());
    expected.extend_from_slice(&1u64.to_be_bytes());
    expected.push(0x01);
    expected.extend_from_slice(b"abc");
    assert_eq!(bytes.as_ref(), expected.as_slice());

    // AND: Decoding gives the chunk back
    assert_eq!(Frame::decode(bytes).unwrap(), Frame::Chunk(chunk));
}

#[test]
fn given_empty_frame_when_decoded_then_malformed() {
    let result = Frame::decode(Bytes::new());

    assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
}

#[test]
fn given_unknown_tag_when_decoded_then_unknown_frame_tag() {
    let result = Frame::decode(Bytes::from_static(&[0x7f, 0, 1]));

    assert!(matches!(
        result,
        Err(ProtocolError::UnknownFrameTag { tag: 0x7f, .. })
    ));
}

#[test]
fn given_truncated_chunk_header_when_decoded_then_malformed() {
    let result = Frame::decode(Bytes::from_static(&[0x02, 0, 0, 0, 1]));

    assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
}

#[test]
fn given_invalid_json_when_decoded_then_malformed() {
    let result = Frame::decode(Bytes::from_static(b"\x01{not json"));

    assert!(matches!(result, Err(ProtocolError::Malformed { .. })));
}

/// **BUG THIS CATCHES**: Accepting a `Response` with no `correlationId`, which
/// the multiplexer could never route and would silently drop.
#[test]
fn given_response_without_correlation_when_decoded_then_missing_correlation() {
    // GIVEN: A hand-built response lacking correlationId
    let mut raw = vec![0x01];
    raw.extend_from_slice(br#"{"id":4,"kind":"Response","name":"evaluate","payload":null}"#);

    // WHEN: Decoding
    let result = Frame::decode(Bytes::from(raw));

    // THEN: Rejected
    assert!(matches!(
        result,
        Err(ProtocolError::MissingCorrelation { id: 4, .. })
    ));
}

#[test]
fn given_notification_without_payload_when_decoded_then_payload_defaults_to_null() {
    let mut raw = vec![0x01];
    raw.extend_from_slice(br#"{"id":9,"kind":"Notification","name":"Plot"}"#);

    let frame = Frame::decode(Bytes::from(raw)).unwrap();

    let Frame::Message(envelope) = frame else {
        panic!("expected a message frame");
    };
    assert_eq!(envelope.kind, MessageKind::Notification);
    assert!(envelope.payload.is_null());
    assert!(envelope.blob_ids.is_empty());
}

#[test]
fn given_error_envelope_when_message_read_then_returns_message_field() {
    let envelope = Envelope::error(2, 1, "evaluate", "object 'x' not found");

    assert_eq!(envelope.error_message(), "object 'x' not found");
    assert!(envelope.is_terminal());
}
