use crate::error::protocol::ProtocolError;

use common::ErrorLocation;

use std::panic::Location;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
}

/// The structured message unit exchanged over a channel.
///
/// `id` is assigned by the sender from its own session-scoped counter.
/// `correlation_id` is only present on `Response` and `Error` and names the
/// request (or reply-expecting notification) being answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: u64,
    pub kind: MessageKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blob_ids: Vec<u64>,
}

impl Envelope {
    pub fn request(id: u64, name: impl Into<String>, payload: Value) -> Self {
        Self::new(id, MessageKind::Request, name, None, payload)
    }

    pub fn notification(id: u64, name: impl Into<String>, payload: Value) -> Self {
        Self::new(id, MessageKind::Notification, name, None, payload)
    }

    pub fn response(id: u64, correlation_id: u64, name: impl Into<String>, payload: Value) -> Self {
        Self::new(id, MessageKind::Response, name, Some(correlation_id), payload)
    }

    pub fn error(id: u64, correlation_id: u64, name: impl Into<String>, message: &str) -> Self {
        Self::new(
            id,
            MessageKind::Error,
            name,
            Some(correlation_id),
            serde_json::json!({ "message": message }),
        )
    }

    fn new(
        id: u64,
        kind: MessageKind,
        name: impl Into<String>,
        correlation_id: Option<u64>,
        payload: Value,
    ) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            correlation_id,
            payload,
            blob_ids: Vec::new(),
        }
    }

    pub fn with_blobs(mut self, blob_ids: Vec<u64>) -> Self {
        self.blob_ids = blob_ids;
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, MessageKind::Response | MessageKind::Error)
    }

    /// Human-readable message of an `Error` envelope.
    pub fn error_message(&self) -> String {
        match self.payload.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => self.payload.to_string(),
        }
    }

    /// Reject envelopes whose shape violates the protocol.
    #[track_caller]
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.is_terminal() && self.correlation_id.is_none() {
            return Err(ProtocolError::MissingCorrelation {
                id: self.id,
                name: self.name.clone(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.name.is_empty() {
            return Err(ProtocolError::malformed(format!(
                "message {} has an empty name",
                self.id
            )));
        }

        Ok(())
    }
}
