//! In-memory beacon cache and its background evictor
//!
//! The [`BeaconCache`] buffers per-session event and action records between
//! the instrumentation threads and the sender worker; the [`CacheEvictor`]
//! keeps it inside its configured memory budget.

mod evictor;
mod store;

pub use evictor::{CacheEvictor, EvictionStats};
pub use store::BeaconCache;
