//! Server response parsing
//!
//! Status and new-session responses carry an ampersand-separated `key=value`
//! body. Parsing is pure: unknown keys are ignored, missing keys retain the
//! value of the previous configuration, and a malformed body yields
//! [`ResponseStatus::Error`], which the state machine treats as "server
//! unreachable for this cycle".

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Response Keys
// ----------------------------------------------------------------------------

pub const RESPONSE_KEY_CAPTURE: &str = "cp";
pub const RESPONSE_KEY_CRASH_REPORTING: &str = "cr";
pub const RESPONSE_KEY_ERROR_REPORTING: &str = "er";
pub const RESPONSE_KEY_MAX_BEACON_SIZE: &str = "bl";
pub const RESPONSE_KEY_SEND_INTERVAL: &str = "si";
pub const RESPONSE_KEY_SERVER_ID: &str = "sr";
pub const RESPONSE_KEY_MULTIPLICITY: &str = "id";
pub const RESPONSE_KEY_CAPTURE_LEVEL: &str = "cl";

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

/// Outcome of parsing a server response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Server-controlled sending configuration.
///
/// Replaces any prior configuration atomically in the sending context. The
/// wire units differ from the in-memory ones: `si` is transmitted in seconds,
/// `bl` in kilobytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Master switch: whether the server wants data at all
    pub capture: bool,
    /// Whether crash records are wanted
    pub crash_reporting: bool,
    /// Whether error records are wanted
    pub error_reporting: bool,
    /// Pacing for open-session beacons, in milliseconds
    pub send_interval_ms: u32,
    /// Upper bound for a single beacon chunk, in bytes
    pub max_beacon_size_bytes: u32,
    /// Server-selected capture detail level
    pub capture_level: u8,
    /// Sampling multiplicity attached to record accounting
    pub multiplicity: u32,
    /// Id of the server instance that answered
    pub server_id: u32,
    /// Whether the response body parsed cleanly
    pub status: ResponseStatus,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capture: true,
            crash_reporting: true,
            error_reporting: true,
            send_interval_ms: 120_000,
            max_beacon_size_bytes: 30 * 1024,
            capture_level: 2,
            multiplicity: 1,
            server_id: 1,
            status: ResponseStatus::Ok,
        }
    }
}

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// Parse a server response body against the previously active configuration.
///
/// Every recognized key overrides the corresponding field; anything the body
/// does not mention is carried over from `previous`. Any malformed pair makes
/// the whole body malformed.
pub fn parse_status_response(body: &str, previous: &ServerConfig) -> ServerConfig {
    let mut config = ServerConfig {
        status: ResponseStatus::Ok,
        ..previous.clone()
    };

    if body.trim().is_empty() {
        return malformed(previous);
    }

    for pair in body.trim().split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            return malformed(previous);
        };
        match key {
            RESPONSE_KEY_CAPTURE => match parse_u32(value) {
                Some(v) => config.capture = v != 0,
                None => return malformed(previous),
            },
            RESPONSE_KEY_CRASH_REPORTING => match parse_u32(value) {
                Some(v) => config.crash_reporting = v != 0,
                None => return malformed(previous),
            },
            RESPONSE_KEY_ERROR_REPORTING => match parse_u32(value) {
                Some(v) => config.error_reporting = v != 0,
                None => return malformed(previous),
            },
            RESPONSE_KEY_SEND_INTERVAL => match parse_u32(value) {
                Some(seconds) => config.send_interval_ms = seconds.saturating_mul(1_000),
                None => return malformed(previous),
            },
            RESPONSE_KEY_MAX_BEACON_SIZE => match parse_u32(value) {
                Some(kilobytes) => {
                    config.max_beacon_size_bytes = kilobytes.saturating_mul(1_024)
                }
                None => return malformed(previous),
            },
            RESPONSE_KEY_SERVER_ID => match parse_u32(value) {
                Some(v) => config.server_id = v,
                None => return malformed(previous),
            },
            RESPONSE_KEY_MULTIPLICITY => match parse_u32(value) {
                Some(v) => config.multiplicity = v,
                None => return malformed(previous),
            },
            RESPONSE_KEY_CAPTURE_LEVEL => match parse_u32(value) {
                Some(v) => config.capture_level = v.min(u8::MAX as u32) as u8,
                None => return malformed(previous),
            },
            // Servers send more keys than this SDK consumes.
            _ => {}
        }
    }

    config
}

fn parse_u32(value: &str) -> Option<u32> {
    value.parse::<u32>().ok()
}

fn malformed(previous: &ServerConfig) -> ServerConfig {
    ServerConfig {
        status: ResponseStatus::Error,
        ..previous.clone()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Serialize the known keys back into wire form (inverse of the parser)
    fn to_wire(config: &ServerConfig) -> String {
        format!(
            "cp={}&cr={}&er={}&si={}&bl={}&cl={}&id={}&sr={}",
            config.capture as u32,
            config.crash_reporting as u32,
            config.error_reporting as u32,
            config.send_interval_ms / 1_000,
            config.max_beacon_size_bytes / 1_024,
            config.capture_level,
            config.multiplicity,
            config.server_id,
        )
    }

    #[test]
    fn test_full_response_parses() {
        let previous = ServerConfig::default();
        let config =
            parse_status_response("cp=0&cr=0&er=1&si=60&bl=64&cl=1&id=3&sr=7", &previous);

        assert!(!config.capture);
        assert!(!config.crash_reporting);
        assert!(config.error_reporting);
        assert_eq!(config.send_interval_ms, 60_000);
        assert_eq!(config.max_beacon_size_bytes, 64 * 1024);
        assert_eq!(config.capture_level, 1);
        assert_eq!(config.multiplicity, 3);
        assert_eq!(config.server_id, 7);
        assert_eq!(config.status, ResponseStatus::Ok);
    }

    #[test]
    fn test_missing_keys_retain_previous_values() {
        let previous = ServerConfig {
            send_interval_ms: 30_000,
            server_id: 5,
            ..ServerConfig::default()
        };
        let config = parse_status_response("cp=1", &previous);

        assert_eq!(config.send_interval_ms, 30_000);
        assert_eq!(config.server_id, 5);
        assert_eq!(config.status, ResponseStatus::Ok);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let previous = ServerConfig::default();
        let config = parse_status_response("cp=1&xx=banana&si=45", &previous);
        assert_eq!(config.send_interval_ms, 45_000);
        assert_eq!(config.status, ResponseStatus::Ok);
    }

    #[test]
    fn test_malformed_bodies_yield_error_status() {
        let previous = ServerConfig {
            send_interval_ms: 10_000,
            ..ServerConfig::default()
        };
        for body in ["", "   ", "cp", "cp=x", "si=12&bl"] {
            let config = parse_status_response(body, &previous);
            assert_eq!(config.status, ResponseStatus::Error, "body: {body:?}");
            // Previous values survive a malformed body untouched.
            assert_eq!(config.send_interval_ms, 10_000, "body: {body:?}");
        }
    }

    #[test]
    fn test_known_keys_round_trip() {
        let original = ServerConfig {
            capture: false,
            crash_reporting: true,
            error_reporting: false,
            send_interval_ms: 90_000,
            max_beacon_size_bytes: 128 * 1024,
            capture_level: 1,
            multiplicity: 2,
            server_id: 9,
            status: ResponseStatus::Ok,
        };
        let reparsed = parse_status_response(&to_wire(&original), &ServerConfig::default());
        assert_eq!(reparsed, original);
    }
}
