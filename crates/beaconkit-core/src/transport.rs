//! HTTP transport contract
//!
//! The sending-state machine talks to the ingestion endpoint through exactly
//! three operations. Implementations are stateless request/response carriers:
//! they never retry, never parse bodies, and map network-level failures to
//! the `http_status = 0` convention so the state machine owns the whole retry
//! policy.

use std::time::Duration;

use hashbrown::HashMap;

use crate::errors::SendError;

/// Backoff applied for a 429 without a parseable `Retry-After` header
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// HTTP Response
// ----------------------------------------------------------------------------

/// Raw result of one HTTP exchange.
///
/// `status == 0` encodes a network-level failure (unreachable host, timeout,
/// aborted connection). Header names are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Create a response with a status code and body
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Create the sentinel response for a network-level failure
    pub fn network_error() -> Self {
        Self::new(0, Vec::new())
    }

    /// Attach a header (name is lowercased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Whether the exchange succeeded (status in [200, 400))
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Whether the server throttled the request
    pub fn is_too_many_requests(&self) -> bool {
        self.status == 429
    }

    /// The `Retry-After` delay, when present and parseable as seconds
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// Body decoded as UTF-8, lossily
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Classify the exchange for the state machine's retry policy
    pub fn classify(&self) -> Result<(), SendError> {
        if self.status == 0 {
            return Err(SendError::TransientNetwork);
        }
        if self.is_too_many_requests() {
            let retry_after = self.retry_after().unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(SendError::Throttled {
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }
        if self.is_success() {
            Ok(())
        } else {
            Err(SendError::ServerRejected {
                status: self.status,
            })
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP Client Contract
// ----------------------------------------------------------------------------

/// The three operations the sending-state machine performs against the
/// ingestion endpoint.
///
/// Implementations must return within a bounded wall-clock budget (the
/// configured request timeout); blocking indefinitely stalls the sender
/// thread and with it orderly shutdown.
pub trait HttpClient: Send + Sync {
    /// GET the current server configuration
    fn send_status_request(&self) -> HttpResponse;

    /// POST one beacon chunk on behalf of the session's client IP
    fn send_beacon_request(&self, client_ip: &str, payload: &[u8]) -> HttpResponse;

    /// GET the per-session configuration for a freshly started session
    fn send_new_session_request(&self) -> HttpResponse;
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
