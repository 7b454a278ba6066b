//! Runtime facade
//!
//! [`BeaconRuntime`] wires the cache, the evictor, the session registry and
//! the sender worker together and exposes the narrow surface the
//! instrumentation layer talks to. Instrumentation calls never block on the
//! network and never fail: after shutdown they degrade to no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use beaconkit_core::{
    BeaconCache, BeaconConfig, BeaconKey, CacheEvictor, EvictionStats, HttpClient, Record, Result,
    ServerConfig, TimeSource,
};
#[cfg(feature = "http")]
use beaconkit_core::SystemTimeSource;

use crate::context::SendingContext;
use crate::session::SessionRegistry;
use crate::states::SenderShared;
use crate::worker::SenderWorker;

// ----------------------------------------------------------------------------
// Beacon Runtime
// ----------------------------------------------------------------------------

/// A running BeaconKit instance: one sender thread, one evictor thread, and
/// the shared state coupling them to the instrumentation surface.
pub struct BeaconRuntime {
    config: Arc<BeaconConfig>,
    cache: Arc<BeaconCache>,
    context: Arc<SendingContext>,
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn TimeSource>,
    worker: Mutex<Option<SenderWorker>>,
    evictor: Mutex<Option<CacheEvictor>>,
    shut_down: AtomicBool,
}

impl BeaconRuntime {
    /// Start a runtime with the default transport and system clock
    #[cfg(feature = "http")]
    pub fn start(config: BeaconConfig) -> Result<Self> {
        let client = Arc::new(crate::http::ReqwestHttpClient::new(&config)?);
        Self::start_with(config, client, Arc::new(SystemTimeSource::new()))
    }

    /// Start a runtime with an injected transport and clock.
    ///
    /// This is the seam tests and embedders with custom transports use; the
    /// configuration is validated the same way as in [`Self::start`].
    pub fn start_with(
        config: BeaconConfig,
        client: Arc<dyn HttpClient>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;

        let config = Arc::new(config);
        let cache = Arc::new(BeaconCache::new(&config.cache));
        let initial_server_config = ServerConfig {
            send_interval_ms: config.transport.default_send_interval.as_millis() as u32,
            ..ServerConfig::default()
        };
        let context = Arc::new(SendingContext::new(initial_server_config));
        let registry = Arc::new(SessionRegistry::new());

        let evictor = CacheEvictor::start(cache.clone(), config.cache.clone(), clock.clone())?;
        let worker = SenderWorker::spawn(SenderShared {
            context: context.clone(),
            cache: cache.clone(),
            registry: registry.clone(),
            client,
            clock: clock.clone(),
            config: config.clone(),
        })?;

        info!(endpoint = %config.endpoint_url, "beaconkit runtime started");
        Ok(Self {
            config,
            cache,
            context,
            registry,
            clock,
            worker: Mutex::new(Some(worker)),
            evictor: Mutex::new(Some(evictor)),
            shut_down: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------
    // Instrumentation surface
    // ------------------------------------------------------------------

    /// Open a new session on behalf of `client_ip` and return its key.
    ///
    /// The key stays valid after shutdown, but all operations on it become
    /// no-ops.
    pub fn create_session(&self, client_ip: &str) -> BeaconKey {
        let key = self.registry.next_key();
        if !self.is_shut_down() {
            self.registry.register(key, client_ip);
            self.context.add_open_session(key);
        }
        key
    }

    /// Buffer a pre-encoded event record for `session`
    pub fn add_event_record(&self, session: BeaconKey, data: impl Into<String>) {
        if self.is_shut_down() {
            return;
        }
        self.cache
            .add_event(session, Record::new(self.clock.now(), data));
    }

    /// Buffer a pre-encoded action record for `session`
    pub fn add_action_record(&self, session: BeaconKey, data: impl Into<String>) {
        if self.is_shut_down() {
            return;
        }
        self.cache
            .add_action(session, Record::new(self.clock.now(), data));
    }

    /// Mark `session` finished; its remaining records become eligible for
    /// immediate transmission and deletion
    pub fn end_session(&self, session: BeaconKey) {
        if self.is_shut_down() {
            return;
        }
        self.context.finish_session(session);
    }

    // ------------------------------------------------------------------
    // Initialization and shutdown
    // ------------------------------------------------------------------

    /// Block until the initialization handshake completes (or is abandoned
    /// at shutdown); returns whether it succeeded
    pub fn wait_for_init_completion(&self) -> bool {
        self.context.wait_for_init_completion()
    }

    /// Bounded variant of [`Self::wait_for_init_completion`]; returns
    /// `false` when the timeout elapses first
    pub fn wait_for_init_completion_timeout(&self, timeout: Duration) -> bool {
        self.context.wait_for_init_completion_timeout(timeout)
    }

    /// Whether the initialization handshake has succeeded
    pub fn is_initialized(&self) -> bool {
        self.context.is_initialized()
    }

    /// Shut down: flush finished sessions, stop and join both background
    /// threads. Safe to call from any thread; later calls are no-ops, and
    /// every call returns only after the threads are joined.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.context.request_shutdown();
        // The slot lock is held across the joins so that a concurrent
        // shutdown() call also returns only once both threads are gone.
        let mut worker_slot = lock(&self.worker);
        if let Some(mut worker) = worker_slot.take() {
            worker.join();
            if let Some(mut evictor) = lock(&self.evictor).take() {
                evictor.stop();
            }
            info!("beaconkit runtime stopped");
        }
    }

    /// Whether shutdown has been requested
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Accounted size of all buffered and in-flight records
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache.num_bytes()
    }

    /// Load-shedding counters of the cache evictor (zeros after shutdown)
    pub fn eviction_stats(&self) -> EvictionStats {
        lock(&self.evictor)
            .as_ref()
            .map(CacheEvictor::stats)
            .unwrap_or_default()
    }

    /// The active configuration
    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }
}

impl Drop for BeaconRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
