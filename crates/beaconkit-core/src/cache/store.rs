//! Per-session record store with explicit in-flight tracking
//!
//! The cache is the single producer/consumer boundary between instrumentation
//! threads and the sender worker. Producers append records in O(1); the
//! sender drains a session through a three-step protocol:
//!
//! 1. [`BeaconCache::prepare_data_for_sending`] moves the buffered records
//!    into the in-flight queue and snapshots them,
//! 2. [`BeaconCache::get_next_beacon_chunk`] consumes whole records into
//!    size-bounded chunks,
//! 3. on transmission failure [`BeaconCache::reset_chunked_data`] restores
//!    the in-flight queue from the snapshot, byte for byte.
//!
//! Eviction only ever touches buffered records, never the in-flight queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use hashbrown::HashMap;

use crate::config::CacheConfig;
use crate::types::{BeaconKey, Record, Timestamp};

// ----------------------------------------------------------------------------
// Cache Bucket
// ----------------------------------------------------------------------------

/// Buffered state for one beacon key.
///
/// A record lives in exactly one of `events`, `actions` or `in_flight`. The
/// `snapshot` is bookkeeping only and does not count towards cache size.
#[derive(Debug, Default)]
struct CacheBucket {
    events: VecDeque<Record>,
    actions: VecDeque<Record>,
    in_flight: VecDeque<Record>,
    snapshot: Vec<Record>,
}

impl CacheBucket {
    fn buffered_bytes(&self) -> u64 {
        queue_bytes(&self.events) + queue_bytes(&self.actions)
    }

    fn total_bytes(&self) -> u64 {
        self.buffered_bytes() + queue_bytes(&self.in_flight)
    }
}

fn queue_bytes(queue: &VecDeque<Record>) -> u64 {
    queue.iter().map(|r| r.size_bytes() as u64).sum()
}

// ----------------------------------------------------------------------------
// Beacon Cache
// ----------------------------------------------------------------------------

/// Thread-safe per-session record store with bounded-memory accounting.
///
/// Locking is two-level: the key map is guarded by one mutex taken only for
/// bucket lookup and key enumeration, each bucket by its own reader/writer
/// lock. The aggregate byte count is an atomic so producers can check the
/// overflow threshold without a lock.
#[derive(Debug)]
pub struct BeaconCache {
    buckets: Mutex<HashMap<BeaconKey, Arc<RwLock<CacheBucket>>>>,
    size_bytes: AtomicU64,
    upper_memory_bound_bytes: u64,
    evictor_signal: Mutex<bool>,
    evictor_condvar: Condvar,
}

impl BeaconCache {
    /// Create an empty cache with the given sizing configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            size_bytes: AtomicU64::new(0),
            upper_memory_bound_bytes: config.upper_memory_bound_bytes,
            evictor_signal: Mutex::new(false),
            evictor_condvar: Condvar::new(),
        }
    }

    /// Append an event record for `key`, creating the bucket lazily
    pub fn add_event(&self, key: BeaconKey, record: Record) {
        let size = record.size_bytes() as u64;
        let bucket = self.bucket(key);
        {
            let mut bucket = write_lock(&bucket);
            bucket.events.push_back(record);
        }
        self.grow(size);
    }

    /// Append an action record for `key`, creating the bucket lazily
    pub fn add_action(&self, key: BeaconKey, record: Record) {
        let size = record.size_bytes() as u64;
        let bucket = self.bucket(key);
        {
            let mut bucket = write_lock(&bucket);
            bucket.actions.push_back(record);
        }
        self.grow(size);
    }

    /// Move the currently buffered records of `key` into the in-flight queue
    /// and snapshot them for a possible [`Self::reset_chunked_data`].
    ///
    /// A no-op while a previous transmission is still outstanding (the
    /// in-flight queue is non-empty), so a retried send continues exactly
    /// where it left off.
    pub fn prepare_data_for_sending(&self, key: BeaconKey) {
        let Some(bucket) = self.existing_bucket(key) else {
            return;
        };
        let mut guard = write_lock(&bucket);
        if !guard.in_flight.is_empty() {
            return;
        }
        let bucket = &mut *guard;
        let mut staged = std::mem::take(&mut bucket.events);
        staged.extend(std::mem::take(&mut bucket.actions));
        bucket.snapshot = staged.iter().cloned().collect();
        bucket.in_flight = staged;
    }

    /// Whether `key` has records staged for transmission
    pub fn has_data_for_sending(&self, key: BeaconKey) -> bool {
        self.existing_bucket(key)
            .map(|bucket| !read_lock(&bucket).in_flight.is_empty())
            .unwrap_or(false)
    }

    /// Assemble the next transmission chunk for `key`.
    ///
    /// The chunk starts with `chunk_prefix` and appends whole in-flight
    /// records, each preceded by `delimiter`, stopping just before the byte
    /// count would exceed `max_size`. Consumed records leave the cache. A
    /// record that cannot fit even into an empty chunk can never be
    /// transmitted and is dropped with a warning. Returns `None` once the
    /// in-flight queue is empty.
    pub fn get_next_beacon_chunk(
        &self,
        key: BeaconKey,
        chunk_prefix: &str,
        max_size: usize,
        delimiter: char,
    ) -> Option<String> {
        let bucket = self.existing_bucket(key)?;
        let mut bucket = write_lock(&bucket);
        if bucket.in_flight.is_empty() {
            bucket.snapshot.clear();
            return None;
        }

        let mut chunk = String::with_capacity(max_size.min(4096));
        chunk.push_str(chunk_prefix);
        let mut consumed_bytes = 0u64;
        let mut appended = false;

        while let Some(front) = bucket.in_flight.front() {
            let needed = chunk.len() + delimiter.len_utf8() + front.data().len();
            if needed > max_size {
                if !appended {
                    // Larger than a whole chunk; it can never be sent.
                    let dropped = bucket.in_flight.pop_front().expect("front checked above");
                    consumed_bytes += dropped.size_bytes() as u64;
                    tracing::warn!(
                        beacon_key = %key,
                        record_bytes = dropped.data().len(),
                        max_size,
                        "dropping record larger than the maximum beacon size"
                    );
                    continue;
                }
                break;
            }
            let record = bucket.in_flight.pop_front().expect("front checked above");
            consumed_bytes += record.size_bytes() as u64;
            chunk.push(delimiter);
            chunk.push_str(record.data());
            appended = true;
        }

        // The snapshot stays until the next call returns `None`: if this very
        // chunk fails to transmit, `reset_chunked_data` must still be able to
        // restore it.
        drop(bucket);
        self.shrink(consumed_bytes);

        if appended {
            Some(chunk)
        } else {
            None
        }
    }

    /// Restore the in-flight queue of `key` from the snapshot taken by
    /// [`Self::prepare_data_for_sending`], undoing any partial chunking.
    pub fn reset_chunked_data(&self, key: BeaconKey) {
        let Some(bucket) = self.existing_bucket(key) else {
            return;
        };
        let mut guard = write_lock(&bucket);
        let bucket = &mut *guard;
        let restored: VecDeque<Record> = bucket.snapshot.iter().cloned().collect();
        let delta = queue_bytes(&restored).saturating_sub(queue_bytes(&bucket.in_flight));
        bucket.in_flight = restored;
        drop(guard);
        self.grow_silent(delta);
    }

    /// Remove the bucket for `key` and release its accounted bytes
    pub fn delete_cache_entry(&self, key: BeaconKey) {
        let removed = {
            let mut buckets = lock(&self.buckets);
            buckets.remove(&key)
        };
        if let Some(bucket) = removed {
            let bucket = read_lock(&bucket);
            self.shrink(bucket.total_bytes());
        }
    }

    /// Drop buffered records of `key` older than `min_timestamp` from the
    /// head of both queues. In-flight records are never touched. Returns the
    /// number of records removed.
    pub fn evict_records_by_age(&self, key: BeaconKey, min_timestamp: Timestamp) -> usize {
        let Some(bucket) = self.existing_bucket(key) else {
            return 0;
        };
        let mut guard = write_lock(&bucket);
        let bucket = &mut *guard;
        let mut removed = 0;
        let mut removed_bytes = 0u64;
        for queue in [&mut bucket.events, &mut bucket.actions] {
            while let Some(front) = queue.front() {
                if front.timestamp() >= min_timestamp {
                    break;
                }
                let record = queue.pop_front().expect("front checked above");
                removed_bytes += record.size_bytes() as u64;
                removed += 1;
            }
        }
        drop(guard);
        self.shrink(removed_bytes);
        removed
    }

    /// Drop up to `count` buffered records of `key` from the head, draining
    /// events before actions. Returns the number actually removed.
    pub fn evict_records_by_number(&self, key: BeaconKey, count: usize) -> usize {
        let Some(bucket) = self.existing_bucket(key) else {
            return 0;
        };
        let mut bucket = write_lock(&bucket);
        let mut removed = 0;
        let mut removed_bytes = 0u64;
        while removed < count {
            let record = match bucket.events.pop_front() {
                Some(record) => record,
                None => match bucket.actions.pop_front() {
                    Some(record) => record,
                    None => break,
                },
            };
            removed_bytes += record.size_bytes() as u64;
            removed += 1;
        }
        drop(bucket);
        self.shrink(removed_bytes);
        removed
    }

    /// Aggregate accounted size of all buckets including in-flight records
    pub fn num_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Acquire)
    }

    /// Snapshot of all keys currently present in the cache.
    ///
    /// The map lock is released before the snapshot is returned; callers
    /// iterate without holding any cache lock.
    pub fn beacon_keys(&self) -> Vec<BeaconKey> {
        let buckets = lock(&self.buckets);
        let mut keys: Vec<BeaconKey> = buckets.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Block until the cache crosses its upper memory bound or `timeout`
    /// elapses. Used by the evictor thread; returns `true` when woken by a
    /// signal rather than the timeout.
    pub fn wait_for_eviction_signal(&self, timeout: Duration) -> bool {
        let mut signaled = lock(&self.evictor_signal);
        if !*signaled {
            let (guard, _) = self
                .evictor_condvar
                .wait_timeout(signaled, timeout)
                .unwrap_or_else(|e| e.into_inner());
            signaled = guard;
        }
        std::mem::take(&mut *signaled)
    }

    /// Wake the evictor thread regardless of cache size (used on shutdown)
    pub fn signal_evictor(&self) {
        *lock(&self.evictor_signal) = true;
        self.evictor_condvar.notify_all();
    }

    fn bucket(&self, key: BeaconKey) -> Arc<RwLock<CacheBucket>> {
        let mut buckets = lock(&self.buckets);
        buckets.entry(key).or_default().clone()
    }

    fn existing_bucket(&self, key: BeaconKey) -> Option<Arc<RwLock<CacheBucket>>> {
        lock(&self.buckets).get(&key).cloned()
    }

    fn grow(&self, bytes: u64) {
        let total = self.size_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if total > self.upper_memory_bound_bytes {
            self.signal_evictor();
        }
    }

    /// Size increase that must not re-trigger the evictor (restoring a
    /// snapshot puts back bytes that were already accounted once).
    fn grow_silent(&self, bytes: u64) {
        self.size_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    fn shrink(&self, bytes: u64) {
        self.size_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

// A poisoned lock only means another thread panicked mid-update of a queue;
// the accounting is corrected by the atomic counter, so recover the guard.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock<'a>(bucket: &'a RwLock<CacheBucket>) -> std::sync::RwLockReadGuard<'a, CacheBucket> {
    bucket.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<'a>(bucket: &'a RwLock<CacheBucket>) -> std::sync::RwLockWriteGuard<'a, CacheBucket> {
    bucket.write().unwrap_or_else(|e| e.into_inner())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RECORD_SIZE_OVERHEAD;

    fn cache() -> BeaconCache {
        BeaconCache::new(&CacheConfig::testing())
    }

    fn record(ts: i64, data: &str) -> Record {
        Record::new(Timestamp::new(ts), data)
    }

    fn key() -> BeaconKey {
        BeaconKey::new(1, 0)
    }

    #[test]
    fn test_accounting_tracks_adds_and_deletes() {
        let cache = cache();
        cache.add_event(key(), record(1, "a=1"));
        cache.add_action(key(), record(2, "b=22"));

        let expected = (3 + RECORD_SIZE_OVERHEAD + 4 + RECORD_SIZE_OVERHEAD) as u64;
        assert_eq!(cache.num_bytes(), expected);

        cache.delete_cache_entry(key());
        assert_eq!(cache.num_bytes(), 0);
        assert!(cache.beacon_keys().is_empty());
    }

    #[test]
    fn test_chunking_concatenates_all_fitting_records() {
        let cache = cache();
        for data in ["a=1", "b=22", "c=333", "d=4444"] {
            cache.add_event(key(), record(1, data));
        }
        cache.prepare_data_for_sending(key());

        let chunk = cache.get_next_beacon_chunk(key(), "p", 50, '&').unwrap();
        assert_eq!(chunk, "p&a=1&b=22&c=333&d=4444");
        assert_eq!(chunk.len(), 23);
        assert_eq!(cache.get_next_beacon_chunk(key(), "p", 50, '&'), None);
    }

    #[test]
    fn test_chunking_respects_max_size_and_never_splits() {
        let cache = cache();
        for data in ["a=1", "b=22", "c=333", "d=4444"] {
            cache.add_event(key(), record(1, data));
        }
        cache.prepare_data_for_sending(key());

        let first = cache.get_next_beacon_chunk(key(), "p", 10, '&').unwrap();
        assert_eq!(first, "p&a=1&b=22");
        let second = cache.get_next_beacon_chunk(key(), "p", 10, '&').unwrap();
        assert_eq!(second, "p&c=333");
        let third = cache.get_next_beacon_chunk(key(), "p", 10, '&').unwrap();
        assert_eq!(third, "p&d=4444");
        assert_eq!(cache.get_next_beacon_chunk(key(), "p", 10, '&'), None);
    }

    #[test]
    fn test_chunking_preserves_insertion_order_events_before_actions() {
        let cache = cache();
        cache.add_event(key(), record(5, "e1=x"));
        cache.add_action(key(), record(1, "a1=x"));
        cache.add_event(key(), record(9, "e2=x"));
        cache.prepare_data_for_sending(key());

        let chunk = cache.get_next_beacon_chunk(key(), "p", 1024, '&').unwrap();
        // Order is insertion order within each sequence, events first.
        assert_eq!(chunk, "p&e1=x&e2=x&a1=x");
    }

    #[test]
    fn test_oversized_record_is_dropped_not_looped() {
        let cache = cache();
        cache.add_event(key(), record(1, "this-record-is-far-too-large=1"));
        cache.add_event(key(), record(2, "ok=1"));
        cache.prepare_data_for_sending(key());

        let chunk = cache.get_next_beacon_chunk(key(), "p", 12, '&').unwrap();
        assert_eq!(chunk, "p&ok=1");
        assert_eq!(cache.get_next_beacon_chunk(key(), "p", 12, '&'), None);
    }

    #[test]
    fn test_prepare_is_idempotent_while_in_flight() {
        let cache = cache();
        cache.add_event(key(), record(1, "a=1"));
        cache.prepare_data_for_sending(key());
        assert!(cache.has_data_for_sending(key()));

        // New data arrives while the first transmission is outstanding.
        cache.add_event(key(), record(2, "b=2"));
        cache.prepare_data_for_sending(key());

        let chunk = cache.get_next_beacon_chunk(key(), "p", 1024, '&').unwrap();
        assert_eq!(chunk, "p&a=1");
        // The late record stays buffered for the next prepare.
        cache.prepare_data_for_sending(key());
        let chunk = cache.get_next_beacon_chunk(key(), "p", 1024, '&').unwrap();
        assert_eq!(chunk, "p&b=2");
    }

    #[test]
    fn test_reset_restores_records_order_and_accounting() {
        let cache = cache();
        for data in ["a=1", "b=22", "c=333"] {
            cache.add_event(key(), record(1, data));
        }
        let before = cache.num_bytes();
        cache.prepare_data_for_sending(key());
        assert_eq!(cache.num_bytes(), before);

        // Consume one chunk, then pretend the send failed.
        let _ = cache.get_next_beacon_chunk(key(), "p", 6, '&').unwrap();
        assert!(cache.num_bytes() < before);
        cache.reset_chunked_data(key());
        assert_eq!(cache.num_bytes(), before);

        let chunk = cache.get_next_beacon_chunk(key(), "p", 1024, '&').unwrap();
        assert_eq!(chunk, "p&a=1&b=22&c=333");
    }

    #[test]
    fn test_evict_by_age_drains_head_only() {
        let cache = cache();
        cache.add_event(key(), record(10, "old=1"));
        cache.add_event(key(), record(20, "mid=1"));
        cache.add_event(key(), record(30, "new=1"));
        cache.add_action(key(), record(5, "act=1"));

        let removed = cache.evict_records_by_age(key(), Timestamp::new(25));
        assert_eq!(removed, 3); // old, mid and the action

        cache.prepare_data_for_sending(key());
        let chunk = cache.get_next_beacon_chunk(key(), "p", 1024, '&').unwrap();
        assert_eq!(chunk, "p&new=1");
    }

    #[test]
    fn test_evict_by_age_spares_in_flight() {
        let cache = cache();
        cache.add_event(key(), record(1, "sending=1"));
        cache.prepare_data_for_sending(key());
        cache.add_event(key(), record(2, "buffered=1"));

        let removed = cache.evict_records_by_age(key(), Timestamp::new(100));
        assert_eq!(removed, 1);
        assert!(cache.has_data_for_sending(key()));
    }

    #[test]
    fn test_evict_by_number_drains_events_then_actions() {
        let cache = cache();
        cache.add_event(key(), record(1, "e1=x"));
        cache.add_event(key(), record(2, "e2=x"));
        cache.add_action(key(), record(3, "a1=x"));

        assert_eq!(cache.evict_records_by_number(key(), 10), 3);
        assert_eq!(cache.evict_records_by_number(key(), 1), 0);
        assert_eq!(cache.num_bytes(), 0);
    }

    #[test]
    fn test_overflow_signals_evictor() {
        let cache = BeaconCache::new(&CacheConfig {
            upper_memory_bound_bytes: 64,
            lower_memory_bound_bytes: 32,
            ..CacheConfig::testing()
        });
        assert!(!cache.wait_for_eviction_signal(Duration::from_millis(1)));

        cache.add_event(key(), record(1, &"x".repeat(64)));
        assert!(cache.wait_for_eviction_signal(Duration::from_millis(50)));
    }
}
