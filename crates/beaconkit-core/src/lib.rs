//! BeaconKit Core
//!
//! This crate provides the foundational pieces of the BeaconKit telemetry SDK:
//! the beacon cache that buffers per-session records, the background evictor
//! that keeps the cache within its memory budget, the wire-protocol helpers
//! for building beacon payloads and parsing server responses, and the
//! `HttpClient` contract that concrete transports implement.
//!
//! ## Architecture Overview
//!
//! BeaconKit is split into two crates with a clear ownership boundary:
//!
//! ### beaconkit-core: The Headless Data Plane
//!
//! Everything in this crate is passive state plus the single evictor thread.
//! Instrumentation threads append [`Record`]s into the [`cache::BeaconCache`]
//! keyed by [`BeaconKey`]; the sender (in `beaconkit-runtime`) drains the
//! cache through an explicit prepare/chunk/reset protocol that survives
//! partial transmission failures.
//!
//! ### beaconkit-runtime: The Sending Control Plane
//!
//! The runtime crate owns the sender worker thread, the sending-state
//! machine, the shared sending context, and the default HTTP transport. It
//! consumes this crate through the [`transport::HttpClient`] trait and the
//! cache's public contract.
//!
//! ## Module Organization
//!
//! - [`types`]: beacon keys, records, timestamps and the injectable clock
//! - [`errors`]: error types shared across the SDK
//! - [`config`]: configuration structs with a validating builder
//! - [`cache`]: the beacon cache and its eviction thread
//! - [`protocol`]: beacon payload construction and server response parsing
//! - [`transport`]: the HTTP transport contract

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod cache;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API - Minimal Interface for SDK Embedders
// ----------------------------------------------------------------------------

pub use cache::{BeaconCache, CacheEvictor, EvictionStats};
pub use config::{BeaconConfig, BeaconConfigBuilder, CacheConfig, TransportConfig, TrustPolicy};
pub use errors::{BeaconError, ConfigError, Result, SendError};
pub use protocol::{ResponseStatus, ServerConfig};
pub use transport::{HttpClient, HttpResponse};
pub use types::{BeaconKey, Record, SystemTimeSource, TimeSource, Timestamp};
