//! Background cache trimmer
//!
//! One thread, woken by the cache's overflow signal or a one-second timeout,
//! applying two independent strategies in order:
//!
//! 1. **Time-based**: drop buffered records older than the configured maximum
//!    record age.
//! 2. **Space-based**: while the cache exceeds its upper memory bound, shed
//!    the oldest record of every session round-robin until the lower bound is
//!    reached or a full pass removes nothing (everything left is in flight).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::BeaconCache;
use crate::config::CacheConfig;
use crate::errors::BeaconError;
use crate::types::TimeSource;

const EVICTOR_WAKE_INTERVAL: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Eviction Statistics
// ----------------------------------------------------------------------------

/// Snapshot of the evictor's load-shedding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    /// Records dropped because they outlived the maximum record age
    pub records_evicted_by_age: u64,
    /// Records dropped under memory pressure
    pub records_evicted_by_space: u64,
}

#[derive(Debug, Default)]
struct Counters {
    by_age: AtomicU64,
    by_space: AtomicU64,
}

// ----------------------------------------------------------------------------
// Cache Evictor
// ----------------------------------------------------------------------------

/// Owns the eviction thread; stops and joins on [`CacheEvictor::stop`] or drop
#[derive(Debug)]
pub struct CacheEvictor {
    cache: Arc<BeaconCache>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    handle: Option<JoinHandle<()>>,
}

impl CacheEvictor {
    /// Spawn the eviction thread for `cache`
    pub fn start(
        cache: Arc<BeaconCache>,
        config: CacheConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, BeaconError> {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let handle = {
            let cache = cache.clone();
            let stop = stop.clone();
            let counters = counters.clone();
            std::thread::Builder::new()
                .name("beaconkit-evictor".into())
                .spawn(move || run(&cache, &config, clock.as_ref(), &stop, &counters))?
        };

        Ok(Self {
            cache,
            stop,
            counters,
            handle: Some(handle),
        })
    }

    /// Counters accumulated since start
    pub fn stats(&self) -> EvictionStats {
        EvictionStats {
            records_evicted_by_age: self.counters.by_age.load(Ordering::Relaxed),
            records_evicted_by_space: self.counters.by_space.load(Ordering::Relaxed),
        }
    }

    /// Stop the eviction thread and join it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.cache.signal_evictor();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("cache evictor thread panicked");
            }
        }
    }
}

impl Drop for CacheEvictor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Eviction Strategies
// ----------------------------------------------------------------------------

fn run(
    cache: &BeaconCache,
    config: &CacheConfig,
    clock: &dyn TimeSource,
    stop: &AtomicBool,
    counters: &Counters,
) {
    debug!("cache evictor thread started");
    while !stop.load(Ordering::Acquire) {
        cache.wait_for_eviction_signal(EVICTOR_WAKE_INTERVAL);
        if stop.load(Ordering::Acquire) {
            break;
        }
        evict_by_age(cache, config, clock, counters);
        evict_by_space(cache, config, counters);
    }
    debug!("cache evictor thread stopped");
}

/// Drop records that outlived `max_record_age`
fn evict_by_age(
    cache: &BeaconCache,
    config: &CacheConfig,
    clock: &dyn TimeSource,
    counters: &Counters,
) {
    let cutoff = clock
        .now()
        .saturating_sub_millis(config.max_record_age.as_millis() as i64);

    let mut removed = 0;
    for key in cache.beacon_keys() {
        removed += cache.evict_records_by_age(key, cutoff);
    }
    if removed > 0 {
        counters.by_age.fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, "evicted records older than the maximum record age");
    }
}

/// Shed the oldest records round-robin until the cache fits the lower bound.
///
/// Aborts after a full pass that removes nothing: the remaining bytes are in
/// flight and must not be touched.
fn evict_by_space(cache: &BeaconCache, config: &CacheConfig, counters: &Counters) {
    if cache.num_bytes() <= config.upper_memory_bound_bytes {
        return;
    }
    warn!(
        cache_bytes = cache.num_bytes(),
        upper_bound = config.upper_memory_bound_bytes,
        "beacon cache exceeds its upper memory bound, shedding oldest records"
    );

    let mut total_removed = 0u64;
    'outer: loop {
        let mut removed_this_pass = 0;
        for key in cache.beacon_keys() {
            if cache.num_bytes() <= config.lower_memory_bound_bytes {
                break 'outer;
            }
            removed_this_pass += cache.evict_records_by_number(key, 1);
        }
        if removed_this_pass == 0 {
            break;
        }
        total_removed += removed_this_pass as u64;
    }

    if total_removed > 0 {
        counters.by_space.fetch_add(total_removed, Ordering::Relaxed);
        warn!(
            removed = total_removed,
            cache_bytes = cache.num_bytes(),
            "memory-pressure eviction finished"
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
