//! Beacon payload construction
//!
//! A beacon chunk is `chunk_prefix & record & record …`. The prefix carries
//! the session-level immutable metadata; the records are pre-encoded by the
//! instrumentation surface and appended verbatim by the cache.

use crate::config::BeaconConfig;
use crate::types::BeaconKey;

// ----------------------------------------------------------------------------
// Wire Constants
// ----------------------------------------------------------------------------

/// Version of the beacon protocol spoken by this SDK
pub const PROTOCOL_VERSION: u32 = 3;

/// Separator between the prefix and records, and between records
pub const BEACON_DELIMITER: char = '&';

pub const QUERY_KEY_PROTOCOL_VERSION: &str = "vv";
pub const QUERY_KEY_APPLICATION_ID: &str = "ap";
pub const QUERY_KEY_VISITOR_ID: &str = "vi";
pub const QUERY_KEY_APPLICATION_VERSION: &str = "vn";
pub const QUERY_KEY_SESSION_NUMBER: &str = "sn";
pub const QUERY_KEY_SESSION_SEQUENCE: &str = "sq";
pub const QUERY_KEY_OPERATING_SYSTEM: &str = "os";
pub const QUERY_KEY_MANUFACTURER: &str = "mf";
pub const QUERY_KEY_MODEL_ID: &str = "md";
pub const QUERY_KEY_MULTIPLICITY: &str = "mp";

// ----------------------------------------------------------------------------
// Chunk Prefix
// ----------------------------------------------------------------------------

/// Build the immutable session-level prefix for one beacon key.
///
/// The prefix is recomputed per transmission because the multiplicity can
/// change with every server response.
pub fn chunk_prefix(config: &BeaconConfig, key: BeaconKey, multiplicity: u32) -> String {
    let mut prefix = String::with_capacity(128);
    push_pair(&mut prefix, QUERY_KEY_PROTOCOL_VERSION, &PROTOCOL_VERSION.to_string());
    push_pair(&mut prefix, QUERY_KEY_APPLICATION_ID, &config.application_id);
    push_pair(&mut prefix, QUERY_KEY_VISITOR_ID, &config.device_id);
    if let Some(version) = &config.application_version {
        push_pair(&mut prefix, QUERY_KEY_APPLICATION_VERSION, version);
    }
    push_pair(&mut prefix, QUERY_KEY_SESSION_NUMBER, &key.beacon_id().to_string());
    push_pair(&mut prefix, QUERY_KEY_SESSION_SEQUENCE, &key.beacon_seq().to_string());
    push_pair(&mut prefix, QUERY_KEY_OPERATING_SYSTEM, &config.operating_system);
    push_pair(&mut prefix, QUERY_KEY_MANUFACTURER, &config.manufacturer);
    push_pair(&mut prefix, QUERY_KEY_MODEL_ID, &config.model_id);
    push_pair(&mut prefix, QUERY_KEY_MULTIPLICITY, &multiplicity.to_string());
    prefix
}

fn push_pair(target: &mut String, key: &str, value: &str) {
    if !target.is_empty() {
        target.push(BEACON_DELIMITER);
    }
    target.push_str(key);
    target.push('=');
    target.push_str(&encode_component(value));
}

// ----------------------------------------------------------------------------
// Component Encoding
// ----------------------------------------------------------------------------

/// Percent-encode a value for use inside a `key=value` pair.
///
/// Unreserved characters (RFC 3986 §2.3) pass through; everything else is
/// encoded byte-wise, so the delimiter can never appear inside a value.
pub fn encode_component(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{byte:02X}"));
            }
        }
    }
    encoded
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_carries_session_metadata() {
        let config = BeaconConfig::testing();
        let prefix = chunk_prefix(&config, BeaconKey::new(17, 2), 4);

        assert!(prefix.starts_with("vv=3&"));
        assert!(prefix.contains("ap=test-app"));
        assert!(prefix.contains("vi=test-device"));
        assert!(prefix.contains("sn=17"));
        assert!(prefix.contains("sq=2"));
        assert!(prefix.contains("os=test-os"));
        assert!(prefix.ends_with("mp=4"));
        // No version configured, so the key must be absent.
        assert!(!prefix.contains("vn="));
    }

    #[test]
    fn test_prefix_encodes_identity_values() {
        let mut config = BeaconConfig::testing();
        config.operating_system = "Windows 11 & more".into();
        let prefix = chunk_prefix(&config, BeaconKey::new(1, 0), 1);
        assert!(prefix.contains("os=Windows%2011%20%26%20more"));
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("plain-value_1.0~x"), "plain-value_1.0~x");
        assert_eq!(encode_component("a b"), "a%20b");
        assert_eq!(encode_component("k=v&k2"), "k%3Dv%26k2");
        assert_eq!(encode_component("ü"), "%C3%BC");
    }
}
