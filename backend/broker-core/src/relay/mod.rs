//! Reverse proxy to external URIs for remote sessions.
//!
//! The front end cannot reach services next to a remote engine-host
//! directly, so it asks the broker to make the call: plain HTTP through
//! [`RemoteUriRelay::relay`], WebSockets through [`websocket`]. Failures of
//! the outbound leg are reported as a status code on the inbound leg.

pub mod http;
pub mod websocket;

pub use http::{RemoteUriRelay, RemoteUriRequest, RemoteUriResponse};

/// Headers that describe one hop and are never forwarded.
pub(crate) const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}
