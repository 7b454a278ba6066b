//! Wire-protocol helpers
//!
//! Beacons and server responses share one line-oriented format: ampersand
//! separated `key=value` pairs of URL-encoded values. [`beacon`] builds the
//! session-level chunk prefix, [`response`] parses server replies into a
//! [`ServerConfig`].

pub mod beacon;
pub mod response;

pub use beacon::{chunk_prefix, encode_component, BEACON_DELIMITER, PROTOCOL_VERSION};
pub use response::{parse_status_response, ResponseStatus, ServerConfig};
