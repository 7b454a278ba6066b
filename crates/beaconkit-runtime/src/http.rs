//! Default HTTP transport over `reqwest::blocking`
//!
//! Implements the [`HttpClient`] contract: no retries, no body parsing, and
//! network-level failures mapped to the `http_status = 0` convention. The
//! request timeout and certificate trust policy come from the transport
//! configuration.

use tracing::warn;

use beaconkit_core::protocol::{encode_component, PROTOCOL_VERSION};
use beaconkit_core::{BeaconConfig, BeaconError, HttpClient, HttpResponse, TrustPolicy};

/// Carries the session's client IP so the backend attributes the beacon to
/// the right origin.
const HEADER_CLIENT_IP: &str = "X-Client-IP";

/// Stateless request/response carrier for the ingestion endpoint
#[derive(Debug)]
pub struct ReqwestHttpClient {
    client: reqwest::blocking::Client,
    status_url: String,
    new_session_url: String,
    beacon_url: String,
}

impl ReqwestHttpClient {
    /// Build a client from the SDK configuration
    pub fn new(config: &BeaconConfig) -> Result<Self, BeaconError> {
        let mut builder =
            reqwest::blocking::Client::builder().timeout(config.transport.request_timeout);
        if config.transport.trust_policy == TrustPolicy::AcceptAll {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| BeaconError::transport_init(e.to_string()))?;

        let base = format!(
            "{}?type=m&ap={}&vv={}",
            config.endpoint_url.trim_end_matches('/'),
            encode_component(&config.application_id),
            PROTOCOL_VERSION,
        );

        Ok(Self {
            client,
            status_url: base.clone(),
            new_session_url: format!("{base}&ns=1"),
            beacon_url: base,
        })
    }

    fn execute(&self, request: reqwest::blocking::RequestBuilder) -> HttpResponse {
        let response = match request.send() {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "http request failed");
                return HttpResponse::network_error();
            }
        };

        let status = response.status().as_u16();
        let mut result = HttpResponse::new(status, Vec::new());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                result = result.with_header(name.as_str(), value);
            }
        }
        match response.bytes() {
            Ok(bytes) => result.body = bytes.to_vec(),
            Err(error) => {
                warn!(%error, "failed to read response body");
                return HttpResponse::network_error();
            }
        }
        result
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send_status_request(&self) -> HttpResponse {
        self.execute(self.client.get(&self.status_url))
    }

    fn send_beacon_request(&self, client_ip: &str, payload: &[u8]) -> HttpResponse {
        let mut request = self.client.post(&self.beacon_url).body(payload.to_vec());
        if !client_ip.is_empty() {
            request = request.header(HEADER_CLIENT_IP, client_ip);
        }
        self.execute(request)
    }

    fn send_new_session_request(&self) -> HttpResponse {
        self.execute(self.client.get(&self.new_session_url))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
