//! Test doubles for driving the sending subsystem deterministically
//!
//! [`MockHttpClient`] answers the three transport operations from scripted
//! response queues (falling back to sensible defaults) and records every
//! request it sees; [`ManualClock`] is a `TimeSource` that only moves when
//! the test advances it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use beaconkit_core::{HttpClient, HttpResponse, TimeSource, Timestamp};

// ----------------------------------------------------------------------------
// Manual Clock
// ----------------------------------------------------------------------------

/// Clock under test control; wall and monotonic time advance together
#[derive(Debug, Default)]
pub struct ManualClock {
    wall_ms: AtomicI64,
    monotonic_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(wall_ms: i64) -> Self {
        Self {
            wall_ms: AtomicI64::new(wall_ms),
            monotonic_ms: AtomicU64::new(0),
        }
    }

    /// Advance both clocks by `delta`
    pub fn advance(&self, delta: Duration) {
        let millis = delta.as_millis() as i64;
        self.wall_ms.fetch_add(millis, Ordering::Relaxed);
        self.monotonic_ms.fetch_add(millis as u64, Ordering::Relaxed);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.wall_ms.load(Ordering::Relaxed))
    }

    fn monotonic_millis(&self) -> u64 {
        self.monotonic_ms.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Mock HTTP Client
// ----------------------------------------------------------------------------

/// A request observed by the mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedRequest {
    Status,
    NewSession,
    Beacon { client_ip: String, payload: Vec<u8> },
}

impl RecordedRequest {
    /// Beacon payload as text, `None` for other request kinds
    pub fn beacon_payload(&self) -> Option<String> {
        match self {
            RecordedRequest::Beacon { payload, .. } => {
                Some(String::from_utf8_lossy(payload).into_owned())
            }
            _ => None,
        }
    }
}

/// Scripted transport double.
///
/// Responses are popped from per-operation queues; an empty queue answers
/// with the configured default (a capture-on status body, an `id=1`
/// new-session body, an empty 200 for beacons).
#[derive(Debug)]
pub struct MockHttpClient {
    status_responses: Mutex<VecDeque<HttpResponse>>,
    new_session_responses: Mutex<VecDeque<HttpResponse>>,
    beacon_responses: Mutex<VecDeque<HttpResponse>>,
    default_status_response: Mutex<HttpResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// A successful response carrying the given body
pub fn ok_response(body: &str) -> HttpResponse {
    HttpResponse::new(200, body.as_bytes().to_vec())
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self {
            status_responses: Mutex::new(VecDeque::new()),
            new_session_responses: Mutex::new(VecDeque::new()),
            beacon_responses: Mutex::new(VecDeque::new()),
            default_status_response: Mutex::new(ok_response(
                "cp=1&cr=1&er=1&si=120&bl=30&cl=2&id=1&sr=1",
            )),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next status response
    pub fn push_status_response(&self, response: HttpResponse) {
        lock(&self.status_responses).push_back(response);
    }

    /// Queue the next new-session response
    pub fn push_new_session_response(&self, response: HttpResponse) {
        lock(&self.new_session_responses).push_back(response);
    }

    /// Queue the next beacon response
    pub fn push_beacon_response(&self, response: HttpResponse) {
        lock(&self.beacon_responses).push_back(response);
    }

    /// Replace the fallback status response (e.g. with a network error to
    /// simulate a permanently unreachable server)
    pub fn set_default_status_response(&self, response: HttpResponse) {
        *lock(&self.default_status_response) = response;
    }

    /// Everything the mock has been asked to send, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// All beacon payloads transmitted so far, as text
    pub fn beacon_payloads(&self) -> Vec<String> {
        lock(&self.requests)
            .iter()
            .filter_map(RecordedRequest::beacon_payload)
            .collect()
    }

    fn record(&self, request: RecordedRequest) {
        lock(&self.requests).push(request);
    }
}

impl HttpClient for MockHttpClient {
    fn send_status_request(&self) -> HttpResponse {
        self.record(RecordedRequest::Status);
        lock(&self.status_responses)
            .pop_front()
            .unwrap_or_else(|| lock(&self.default_status_response).clone())
    }

    fn send_beacon_request(&self, client_ip: &str, payload: &[u8]) -> HttpResponse {
        self.record(RecordedRequest::Beacon {
            client_ip: client_ip.to_string(),
            payload: payload.to_vec(),
        });
        lock(&self.beacon_responses)
            .pop_front()
            .unwrap_or_else(|| HttpResponse::new(200, Vec::new()))
    }

    fn send_new_session_request(&self) -> HttpResponse {
        self.record(RecordedRequest::NewSession);
        lock(&self.new_session_responses)
            .pop_front()
            .unwrap_or_else(|| ok_response("id=1"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
