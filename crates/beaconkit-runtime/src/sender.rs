//! Chunked beacon transmission for one session
//!
//! The single routine both CaptureOn and FlushSessions use: resolve the
//! session's per-session configuration, stage the buffered records, then ship
//! size-bounded chunks until the staging queue drains. A failed chunk
//! restores the staged records so the next attempt resends the same bytes.

use std::time::Duration;

use tracing::{debug, warn};

use beaconkit_core::protocol::{chunk_prefix, parse_status_response, ResponseStatus, BEACON_DELIMITER};
use beaconkit_core::{BeaconKey, SendError};

use crate::session::{SessionSendState, MAX_NEW_SESSION_ATTEMPTS};
use crate::states::SenderShared;

/// Attempts per chunk when the server answers 429
const MAX_THROTTLE_ATTEMPTS: u32 = 3;

/// Result of one send pass over a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// Every staged chunk was accepted (or the session had nothing to send)
    Completed,
    /// The per-session handshake is unresolved; try again next iteration
    Deferred,
    /// A chunk was refused; staged records were restored for a retry
    Failed,
}

/// Transmit the buffered records of `key`, deleting the session's cache
/// entry on completion when `delete_on_completion` is set (finished
/// sessions). Open sessions keep their bucket: only the records staged at
/// prepare time go out, later inserts wait for the next pass.
pub(crate) fn send_session_beacons(
    shared: &SenderShared,
    key: BeaconKey,
    delete_on_completion: bool,
) -> SendOutcome {
    let Some(meta) = shared.registry.meta(key) else {
        // The session vanished from the registry; its records are orphaned.
        shared.cache.delete_cache_entry(key);
        return SendOutcome::Completed;
    };

    let multiplicity = match meta.send_state {
        SessionSendState::Configured { multiplicity } => multiplicity,
        SessionSendState::New { .. } => match resolve_new_session(shared, key) {
            Some(multiplicity) => multiplicity,
            None => return SendOutcome::Deferred,
        },
    };

    if multiplicity == 0 {
        debug!(beacon_key = %key, "session disabled by server, discarding buffered records");
        shared.cache.delete_cache_entry(key);
        shared.registry.remove(key);
        return SendOutcome::Completed;
    }

    let server_config = shared.context.server_config();
    let prefix = chunk_prefix(&shared.config, key, multiplicity);
    let max_size = server_config.max_beacon_size_bytes as usize;

    shared.cache.prepare_data_for_sending(key);
    while let Some(chunk) =
        shared
            .cache
            .get_next_beacon_chunk(key, &prefix, max_size, BEACON_DELIMITER)
    {
        if let Err(error) = transmit_chunk(shared, key, &meta.client_ip, chunk.as_bytes()) {
            warn!(beacon_key = %key, %error, "beacon transmission failed");
            if error.is_client_rejection() {
                shared.context.disable_capture();
            }
            shared.cache.reset_chunked_data(key);
            return SendOutcome::Failed;
        }
    }

    if delete_on_completion {
        shared.cache.delete_cache_entry(key);
        shared.registry.remove(key);
    }
    SendOutcome::Completed
}

/// Ask the server for the session's configuration. Returns the resolved
/// multiplicity, falling back to the current server config once the attempt
/// budget is exhausted; `None` while the handshake is still pending.
fn resolve_new_session(shared: &SenderShared, key: BeaconKey) -> Option<u32> {
    let response = shared.client.send_new_session_request();
    if response.is_success() {
        let parsed = parse_status_response(&response.body_str(), &shared.context.server_config());
        if parsed.status == ResponseStatus::Ok {
            shared.registry.mark_configured(key, parsed.multiplicity);
            return Some(parsed.multiplicity);
        }
    }

    let attempts = shared.registry.note_new_session_failure(key);
    debug!(
        beacon_key = %key,
        attempts,
        http_status = response.status,
        "new-session request failed"
    );
    if attempts >= MAX_NEW_SESSION_ATTEMPTS {
        let multiplicity = shared.context.server_config().multiplicity;
        shared.registry.mark_configured(key, multiplicity);
        return Some(multiplicity);
    }
    None
}

/// Ship one chunk, honoring `Retry-After` for up to three attempts
fn transmit_chunk(
    shared: &SenderShared,
    key: BeaconKey,
    client_ip: &str,
    payload: &[u8],
) -> Result<(), SendError> {
    let mut attempt = 1;
    loop {
        let response = shared.client.send_beacon_request(client_ip, payload);
        match response.classify() {
            Ok(()) => return Ok(()),
            Err(SendError::Throttled { retry_after_ms }) if attempt < MAX_THROTTLE_ATTEMPTS => {
                debug!(beacon_key = %key, attempt, retry_after_ms, "server throttled beacon");
                if !shared
                    .context
                    .sleep(Duration::from_millis(retry_after_ms))
                {
                    // Shutdown preempted the backoff.
                    return Err(SendError::Throttled { retry_after_ms });
                }
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
