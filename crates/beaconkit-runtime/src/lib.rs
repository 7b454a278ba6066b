//! BeaconKit Runtime
//!
//! This crate owns everything that moves in the BeaconKit SDK: the sender
//! worker thread that drives the sending-state machine, the shared sending
//! context that couples it to the instrumentation surface, the session
//! registry, and the default HTTP transport.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beaconkit_core::BeaconConfig;
//! use beaconkit_runtime::BeaconRuntime;
//!
//! # fn main() -> beaconkit_core::Result<()> {
//! let config = BeaconConfig::builder(
//!     "https://ingest.example.com/mbeacon",
//!     "my-application-id",
//!     "device-4711",
//! )
//! .with_application_version("2.4.1")
//! .build()?;
//!
//! let runtime = BeaconRuntime::start(config)?;
//! runtime.wait_for_init_completion_timeout(std::time::Duration::from_secs(10));
//!
//! let session = runtime.create_session("203.0.113.4");
//! runtime.add_event_record(session, "et=10&na=loadPage");
//! runtime.add_action_record(session, "et=1&na=checkout&ca=1");
//! runtime.end_session(session);
//!
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - `runtime`: the [`BeaconRuntime`] facade the instrumentation talks to
//! - [`testing`]: scripted mock transport and manual clock for tests
//! - `context`, `states`, `sender`, `worker`, `session`: the sending
//!   subsystem internals

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

mod context;
mod runtime;
mod sender;
mod session;
mod states;
mod worker;

#[cfg(feature = "http")]
mod http;

pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use runtime::BeaconRuntime;
pub use states::StateKind;

#[cfg(feature = "http")]
pub use http::ReqwestHttpClient;

// Re-export the core types an embedder needs to configure and drive the SDK.
pub use beaconkit_core::{
    BeaconConfig, BeaconConfigBuilder, BeaconError, BeaconKey, HttpClient, HttpResponse, Result,
    ServerConfig, SystemTimeSource, TimeSource, TrustPolicy,
};
