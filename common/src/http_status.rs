//! HTTP status codes used by the relay and the broker HTTP surface.

/// HTTP status code, stored as the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpStatusCode(pub u16);

impl HttpStatusCode {
    pub const OK: HttpStatusCode = HttpStatusCode(200);
    pub const BAD_REQUEST: HttpStatusCode = HttpStatusCode(400);
    pub const BAD_GATEWAY: HttpStatusCode = HttpStatusCode(502);
    pub const GATEWAY_TIMEOUT: HttpStatusCode = HttpStatusCode(504);

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 4xx client errors.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    /// 5xx server errors.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Codes produced by the broker itself when the outbound leg of a relay fails.
    pub fn is_gateway_failure(&self) -> bool {
        matches!(self.0, 502 | 504)
    }
}

impl From<u16> for HttpStatusCode {
    fn from(code: u16) -> Self {
        HttpStatusCode(code)
    }
}

impl std::fmt::Display for HttpStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
