//! Shared state between the sender worker and the instrumentation surface
//!
//! Every field lives behind one mutex and is reached only through named
//! operations; the lock is never held across blocking I/O. Two condition
//! variables hang off the mutex: `init_done` (signaled when initialization
//! completes or is abandoned) and `wakeup` (signaled on shutdown so every
//! sleeping thread wakes within its bounded wait).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use hashbrown::HashSet;

use beaconkit_core::{BeaconKey, ServerConfig};

use crate::states::StateKind;

// ----------------------------------------------------------------------------
// Context State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ContextInner {
    shutdown_requested: bool,
    init_completed: bool,
    init_succeeded: bool,
    /// Monotonic instant of the last successful status exchange
    last_status_check_ms: Option<u64>,
    /// Monotonic instant of the last open-session beacon pass
    last_open_session_send_ms: Option<u64>,
    server_config: ServerConfig,
    current_state: StateKind,
    next_state: Option<StateKind>,
    open_sessions: HashSet<BeaconKey>,
    finished_sessions: VecDeque<BeaconKey>,
}

/// Synchronized sending state shared by the worker, the state executors and
/// arbitrary caller threads.
#[derive(Debug)]
pub(crate) struct SendingContext {
    inner: Mutex<ContextInner>,
    init_done: Condvar,
    wakeup: Condvar,
}

impl SendingContext {
    /// Create a context starting in the Init state with the given fallback
    /// server configuration
    pub fn new(initial_config: ServerConfig) -> Self {
        Self {
            inner: Mutex::new(ContextInner {
                shutdown_requested: false,
                init_completed: false,
                init_succeeded: false,
                last_status_check_ms: None,
                last_open_session_send_ms: None,
                server_config: initial_config,
                current_state: StateKind::Init,
                next_state: None,
                open_sessions: HashSet::new(),
                finished_sessions: VecDeque::new(),
            }),
            init_done: Condvar::new(),
            wakeup: Condvar::new(),
        }
    }

    // ------------------------------------------------------------------
    // Shutdown and sleeping
    // ------------------------------------------------------------------

    /// Request orderly shutdown and wake every sleeper
    pub fn request_shutdown(&self) {
        self.lock().shutdown_requested = true;
        self.wakeup.notify_all();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.lock().shutdown_requested
    }

    /// Sleep for `duration`, waking early when shutdown is requested.
    ///
    /// Returns `true` when the full duration elapsed, `false` when the sleep
    /// was cut short by shutdown (including when shutdown was already
    /// requested on entry).
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut inner = self.lock();
        while !inner.shutdown_requested {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        false
    }

    // ------------------------------------------------------------------
    // Initialization signaling
    // ------------------------------------------------------------------

    /// Record the outcome of the initialization handshake and release every
    /// waiter
    pub fn mark_init_completed(&self, succeeded: bool) {
        let mut inner = self.lock();
        inner.init_completed = true;
        inner.init_succeeded = succeeded;
        drop(inner);
        self.init_done.notify_all();
    }

    /// Called when the worker reaches Terminal: if initialization never
    /// completed, waiters are released with a failure result.
    pub fn mark_terminated(&self) {
        let mut inner = self.lock();
        if !inner.init_completed {
            inner.init_completed = true;
        }
        drop(inner);
        self.init_done.notify_all();
    }

    /// Block until initialization completes; returns `init_succeeded`
    pub fn wait_for_init_completion(&self) -> bool {
        let mut inner = self.lock();
        while !inner.init_completed {
            inner = self
                .init_done
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner.init_succeeded
    }

    /// Block until initialization completes or `timeout` elapses; returns
    /// `init_succeeded` (and thus `false` on timeout)
    pub fn wait_for_init_completion_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while !inner.init_completed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .init_done
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        inner.init_succeeded
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().init_succeeded
    }

    // ------------------------------------------------------------------
    // Server configuration
    // ------------------------------------------------------------------

    pub fn server_config(&self) -> ServerConfig {
        self.lock().server_config.clone()
    }

    /// Atomically replace the active server configuration
    pub fn set_server_config(&self, config: ServerConfig) {
        self.lock().server_config = config;
    }

    pub fn capture_enabled(&self) -> bool {
        self.lock().server_config.capture
    }

    /// Force capture off (server refused a payload with a client error)
    pub fn disable_capture(&self) {
        self.lock().server_config.capture = false;
    }

    // ------------------------------------------------------------------
    // Pacing timestamps (monotonic milliseconds)
    // ------------------------------------------------------------------

    pub fn last_status_check_ms(&self) -> Option<u64> {
        self.lock().last_status_check_ms
    }

    pub fn set_last_status_check_ms(&self, at: u64) {
        self.lock().last_status_check_ms = Some(at);
    }

    pub fn last_open_session_send_ms(&self) -> Option<u64> {
        self.lock().last_open_session_send_ms
    }

    pub fn set_last_open_session_send_ms(&self, at: u64) {
        self.lock().last_open_session_send_ms = Some(at);
    }

    // ------------------------------------------------------------------
    // State machine bookkeeping
    // ------------------------------------------------------------------

    pub fn current_state(&self) -> StateKind {
        self.lock().current_state
    }

    pub fn set_next_state(&self, next: StateKind) {
        self.lock().next_state = Some(next);
    }

    /// Swap in the pending next state, if any; returns the now-current state
    pub fn advance(&self) -> StateKind {
        let mut inner = self.lock();
        if let Some(next) = inner.next_state.take() {
            tracing::debug!(from = inner.current_state.name(), to = next.name(), "state transition");
            inner.current_state = next;
        }
        inner.current_state
    }

    /// Drive the machine straight to Terminal (unrecoverable worker error)
    pub fn force_terminal(&self) {
        let mut inner = self.lock();
        inner.next_state = None;
        inner.current_state = StateKind::Terminal;
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    pub fn add_open_session(&self, key: BeaconKey) {
        self.lock().open_sessions.insert(key);
    }

    /// Move `key` from the open set to the finished queue. Unknown or
    /// already-finished keys are ignored.
    pub fn finish_session(&self, key: BeaconKey) {
        let mut inner = self.lock();
        if inner.open_sessions.remove(&key) {
            inner.finished_sessions.push_back(key);
        }
    }

    /// Mark every open session finished (shutdown flush)
    pub fn finish_all_open_sessions(&self) {
        let mut inner = self.lock();
        let keys: Vec<BeaconKey> = inner.open_sessions.drain().collect();
        inner.finished_sessions.extend(keys);
    }

    pub fn pop_finished_session(&self) -> Option<BeaconKey> {
        self.lock().finished_sessions.pop_front()
    }

    /// Put a finished session back at the front of the queue so the retry
    /// preserves its position
    pub fn push_finished_session_front(&self, key: BeaconKey) {
        self.lock().finished_sessions.push_front(key);
    }

    pub fn open_sessions_snapshot(&self) -> Vec<BeaconKey> {
        let inner = self.lock();
        let mut keys: Vec<BeaconKey> = inner.open_sessions.iter().copied().collect();
        keys.sort_unstable();
        keys
    }

    // A poisoned context only means the sender worker panicked; the panic is
    // already contained and reported by the worker loop.
    fn lock(&self) -> MutexGuard<'_, ContextInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sleep_interrupted_by_shutdown() {
        let context = Arc::new(SendingContext::new(ServerConfig::default()));
        let sleeper = context.clone();

        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let completed = sleeper.sleep(Duration::from_secs(30));
            (completed, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        context.request_shutdown();

        let (completed, elapsed) = handle.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(1), "woke after {elapsed:?}");
    }

    #[test]
    fn test_sleep_elapses_without_shutdown() {
        let context = SendingContext::new(ServerConfig::default());
        let started = Instant::now();
        assert!(context.sleep(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_for_init_times_out() {
        let context = SendingContext::new(ServerConfig::default());
        let started = Instant::now();
        assert!(!context.wait_for_init_completion_timeout(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_init_signal_releases_waiter() {
        let context = Arc::new(SendingContext::new(ServerConfig::default()));
        let waiter = context.clone();
        let handle = std::thread::spawn(move || waiter.wait_for_init_completion());

        std::thread::sleep(Duration::from_millis(20));
        context.mark_init_completed(true);
        assert!(handle.join().unwrap());
        assert!(context.is_initialized());
    }

    #[test]
    fn test_terminated_without_init_reports_failure() {
        let context = SendingContext::new(ServerConfig::default());
        context.mark_terminated();
        assert!(!context.wait_for_init_completion());
        assert!(!context.is_initialized());
    }

    #[test]
    fn test_session_lifecycle_queues() {
        let context = SendingContext::new(ServerConfig::default());
        let a = BeaconKey::new(1, 0);
        let b = BeaconKey::new(2, 0);

        context.add_open_session(a);
        context.add_open_session(b);
        context.finish_session(a);
        context.finish_session(a); // double finish is a no-op

        assert_eq!(context.open_sessions_snapshot(), vec![b]);
        assert_eq!(context.pop_finished_session(), Some(a));
        assert_eq!(context.pop_finished_session(), None);

        context.finish_all_open_sessions();
        assert_eq!(context.pop_finished_session(), Some(b));
        assert!(context.open_sessions_snapshot().is_empty());
    }

    #[test]
    fn test_state_advance_swaps_pending_state() {
        let context = SendingContext::new(ServerConfig::default());
        assert_eq!(context.current_state(), StateKind::Init);

        context.advance();
        assert_eq!(context.current_state(), StateKind::Init);

        context.set_next_state(StateKind::CaptureOn);
        assert_eq!(context.advance(), StateKind::CaptureOn);
    }
}
