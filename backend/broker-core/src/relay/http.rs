use crate::error::relay::RelayError;
use crate::relay::is_hop_by_hop;

use common::{ErrorLocation, HttpStatusCode};

use std::collections::HashMap;
use std::panic::Location;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_METHOD: &str = "GET";

/// Body of `POST /remoteuri`. `content` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUriRequest {
    pub uri: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub content: Option<String>,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

/// Result of a relayed request. `content` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUriResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub content: String,
}

impl RemoteUriResponse {
    /// Response standing in for a failed outbound call.
    pub fn from_error(error: &RelayError) -> Self {
        Self {
            status_code: error.status_code().0,
            headers: HashMap::new(),
            content: BASE64.encode(error.to_string()),
        }
    }

    pub fn status(&self) -> HttpStatusCode {
        HttpStatusCode(self.status_code)
    }

    pub fn decoded_content(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.content).ok()
    }
}

pub struct RemoteUriRelay {
    client: Client,
}

impl RemoteUriRelay {
    #[track_caller]
    pub fn new(timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::from_reqwest(&e))?;
        Ok(Self { client })
    }

    /// Perform `request` against its URI.
    ///
    /// Whatever status the target answers with is passed through; only a
    /// failure to reach it is an error (502, or 504 on timeout).
    pub async fn relay(&self, request: RemoteUriRequest) -> Result<RemoteUriResponse, RelayError> {
        let url = Url::parse(&request.uri)
            .map_err(|e| RelayError::invalid_request(format!("invalid uri '{}': {e}", request.uri)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::invalid_request(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| RelayError::invalid_request(format!("invalid method: {e}")))?;

        let body = match &request.content {
            Some(content) if !content.is_empty() => BASE64
                .decode(content)
                .map_err(|e| RelayError::invalid_request(format!("content is not base64: {e}")))?,
            _ => Vec::new(),
        };

        debug!("Relaying {method} {url}");
        let mut outbound = self.client.request(method, url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) {
                outbound = outbound.header(name.as_str(), value.as_str());
            }
        }
        if !body.is_empty() {
            outbound = outbound.body(body);
        }

        let response = outbound.send().await.map_err(|e| {
            warn!("Relay to {url} failed: {e}");
            RelayError::from_reqwest(&e)
        })?;

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();

        let content = response.bytes().await.map_err(|e| RelayError::Outbound {
            message: format!("Failed to read response body: {e}"),
            status: HttpStatusCode::BAD_GATEWAY,
            location: ErrorLocation::from(Location::caller()),
        })?;

        debug!("Relay to {url} answered {status_code} ({} bytes)", content.len());
        Ok(RemoteUriResponse {
            status_code,
            headers,
            content: BASE64.encode(&content),
        })
    }
}
