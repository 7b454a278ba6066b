//! Session registry
//!
//! The arena that keeps per-session sending state alive until the sender
//! releases it. Instrumentation code holds only the [`BeaconKey`]; everything
//! the sender needs to transmit on a session's behalf (client IP, the
//! new-session handshake budget, the resolved multiplicity) lives here.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;

use beaconkit_core::BeaconKey;

/// New-session requests attempted before falling back to the server config
pub(crate) const MAX_NEW_SESSION_ATTEMPTS: u8 = 4;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Per-session sending state
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionSendState {
    /// Waiting for the per-session configuration handshake
    New { attempts: u8 },
    /// Handshake resolved; sessions with multiplicity 0 are discarded
    Configured { multiplicity: u32 },
}

#[derive(Debug, Clone)]
pub(crate) struct SessionMeta {
    pub client_ip: String,
    pub send_state: SessionSendState,
}

// ----------------------------------------------------------------------------
// Session Registry
// ----------------------------------------------------------------------------

/// Keyed session arena with a monotonic key allocator.
///
/// Session numbers start at 1 and are never reused within a process
/// lifetime, which is what makes cache keys unique after removal.
#[derive(Debug, Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<BeaconKey, SessionMeta>>,
    next_session_id: AtomicU32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next session key without registering it
    pub fn next_key(&self) -> BeaconKey {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        BeaconKey::new(id, 0)
    }

    /// Register a session under `key`
    pub fn register(&self, key: BeaconKey, client_ip: &str) {
        self.lock().insert(
            key,
            SessionMeta {
                client_ip: client_ip.to_string(),
                send_state: SessionSendState::New { attempts: 0 },
            },
        );
    }

    pub fn meta(&self, key: BeaconKey) -> Option<SessionMeta> {
        self.lock().get(&key).cloned()
    }

    /// Resolve the per-session handshake
    pub fn mark_configured(&self, key: BeaconKey, multiplicity: u32) {
        if let Some(meta) = self.lock().get_mut(&key) {
            meta.send_state = SessionSendState::Configured { multiplicity };
        }
    }

    /// Record a failed new-session request; returns the new attempt count
    pub fn note_new_session_failure(&self, key: BeaconKey) -> u8 {
        let mut sessions = self.lock();
        match sessions.get_mut(&key) {
            Some(SessionMeta {
                send_state: SessionSendState::New { attempts },
                ..
            }) => {
                *attempts = attempts.saturating_add(1);
                *attempts
            }
            _ => 0,
        }
    }

    pub fn remove(&self, key: BeaconKey) {
        self.lock().remove(&key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BeaconKey, SessionMeta>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_monotonic_and_never_reused() {
        let registry = SessionRegistry::new();
        let a = registry.next_key();
        registry.register(a, "127.0.0.1");
        registry.remove(a);

        let b = registry.next_key();
        assert_ne!(a, b);
        assert!(b.beacon_id() > a.beacon_id());
    }

    #[test]
    fn test_new_session_handshake_bookkeeping() {
        let registry = SessionRegistry::new();
        let key = registry.next_key();
        registry.register(key, "10.0.0.1");

        assert_eq!(
            registry.meta(key).unwrap().send_state,
            SessionSendState::New { attempts: 0 }
        );
        assert_eq!(registry.note_new_session_failure(key), 1);
        assert_eq!(registry.note_new_session_failure(key), 2);

        registry.mark_configured(key, 3);
        assert_eq!(
            registry.meta(key).unwrap().send_state,
            SessionSendState::Configured { multiplicity: 3 }
        );
        // Failures after configuration are ignored.
        assert_eq!(registry.note_new_session_failure(key), 0);
    }

    #[test]
    fn test_remove_releases_meta() {
        let registry = SessionRegistry::new();
        let key = registry.next_key();
        registry.register(key, "10.0.0.1");
        assert_eq!(registry.len(), 1);

        registry.remove(key);
        assert!(registry.meta(key).is_none());
        assert_eq!(registry.len(), 0);
    }
}
