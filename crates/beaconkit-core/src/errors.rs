//! Error types for the BeaconKit SDK
//!
//! This module contains all error types used across component boundaries:
//! configuration validation errors, send-cycle errors observed by the state
//! machine, and the main `BeaconError` type that unifies them.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Configuration validation errors raised by the builder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("beacon endpoint URL must not be empty")]
    EmptyEndpointUrl,
    #[error("application id must not be empty")]
    EmptyApplicationId,
    #[error("device id must not be empty")]
    EmptyDeviceId,
    #[error("max record age must be at least 1 ms (got {got_ms} ms)")]
    InvalidRecordAge { got_ms: u64 },
    #[error("lower memory bound {lower} must be positive and below upper bound {upper}")]
    InvalidMemoryBounds { lower: u64, upper: u64 },
}

/// Errors observed for a single send cycle.
///
/// These never propagate to instrumentation callers; the state machine logs
/// them and applies its per-state retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("network unreachable or request aborted")]
    TransientNetwork,
    #[error("server rejected request with HTTP {status}")]
    ServerRejected { status: u16 },
    #[error("server response could not be parsed")]
    MalformedResponse,
    #[error("server throttled the request, retry after {retry_after_ms} ms")]
    Throttled { retry_after_ms: u64 },
}

impl SendError {
    /// Whether this error indicates the server explicitly refused the payload
    /// with a client error other than throttling
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, SendError::ServerRejected { status } if (400..500).contains(status) && *status != 429)
    }
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for the BeaconKit SDK
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("send error: {0}")]
    Send(#[from] SendError),

    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transport initialization failed: {reason}")]
    TransportInit { reason: String },
}

impl BeaconError {
    /// Create a transport initialization error with a reason
    pub fn transport_init<T: Into<String>>(reason: T) -> Self {
        BeaconError::TransportInit {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, BeaconError>;
