//! Sending-state machine
//!
//! Exactly one state is active at a time; [`execute`] dispatches on the
//! current [`StateKind`], runs the state once against the shared context and
//! then swaps in the pending transition. States never hold data of their own:
//! everything they need lives in the [`SendingContext`], which keeps the
//! machine a plain tagged variant with a single dispatch function.
//!
//! Transitions: `Init → {CaptureOn, CaptureOff, Terminal}`,
//! `CaptureOn ↔ CaptureOff`, `CaptureOn → FlushSessions → Terminal`,
//! `CaptureOff → Terminal` on shutdown (buffered payloads are discarded when
//! capture is off).

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use beaconkit_core::protocol::{parse_status_response, ResponseStatus};
use beaconkit_core::{
    BeaconCache, BeaconConfig, BeaconKey, HttpClient, HttpResponse, ServerConfig, TimeSource,
};

use crate::context::SendingContext;
use crate::sender::{send_session_beacons, SendOutcome};
use crate::session::SessionRegistry;

// ----------------------------------------------------------------------------
// Timing Constants
// ----------------------------------------------------------------------------

/// Initialization retry delays, walked front to back
pub(crate) const INIT_BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_millis(1_000),
    Duration::from_millis(2_000),
    Duration::from_millis(4_000),
    Duration::from_millis(8_000),
    Duration::from_millis(16_000),
];

/// Pause before the backoff schedule restarts from the top
pub(crate) const REINIT_DELAY: Duration = Duration::from_millis(7_200_000);

/// Upper bound for the per-iteration sleep while capturing
const CAPTURE_ON_SLEEP: Duration = Duration::from_secs(1);

/// Consecutive failures of a single session that abort the shutdown flush
const MAX_FLUSH_FAILURES_PER_SESSION: u32 = 2;

// ----------------------------------------------------------------------------
// State Kind
// ----------------------------------------------------------------------------

/// The five states of the sending machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Obtaining the initial server configuration
    Init,
    /// Steady-state transmission
    CaptureOn,
    /// Status-only polling while the server refuses data
    CaptureOff,
    /// Draining finished sessions during shutdown
    FlushSessions,
    /// Worker loop exit
    Terminal,
}

impl StateKind {
    /// State name for logging
    pub fn name(&self) -> &'static str {
        match self {
            StateKind::Init => "Init",
            StateKind::CaptureOn => "CaptureOn",
            StateKind::CaptureOff => "CaptureOff",
            StateKind::FlushSessions => "FlushSessions",
            StateKind::Terminal => "Terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::Terminal)
    }
}

// ----------------------------------------------------------------------------
// Shared Dependencies
// ----------------------------------------------------------------------------

/// Everything a state needs to run, shared with the worker thread
#[derive(Clone)]
pub(crate) struct SenderShared {
    pub context: Arc<SendingContext>,
    pub cache: Arc<BeaconCache>,
    pub registry: Arc<SessionRegistry>,
    pub client: Arc<dyn HttpClient>,
    pub clock: Arc<dyn TimeSource>,
    pub config: Arc<BeaconConfig>,
}

// ----------------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------------

/// Execute the current state once, then apply its transition
pub(crate) fn execute(shared: &SenderShared) {
    match shared.context.current_state() {
        StateKind::Init => execute_init(shared),
        StateKind::CaptureOn => execute_capture_on(shared),
        StateKind::CaptureOff => execute_capture_off(shared),
        StateKind::FlushSessions => execute_flush(shared),
        StateKind::Terminal => {}
    }
    shared.context.advance();
}

/// Parse a status exchange; `None` means "server unreachable for this cycle"
fn interpret_status_response(
    response: &HttpResponse,
    previous: &ServerConfig,
) -> Option<ServerConfig> {
    if !response.is_success() {
        return None;
    }
    let parsed = parse_status_response(&response.body_str(), previous);
    if parsed.status == ResponseStatus::Error {
        return None;
    }
    Some(parsed)
}

// ----------------------------------------------------------------------------
// Init
// ----------------------------------------------------------------------------

/// Retry the status handshake on the backoff schedule until it succeeds or
/// shutdown is requested.
fn execute_init(shared: &SenderShared) {
    let context = &shared.context;
    let mut delay_index = 0;
    let mut attempt = 1u32;

    loop {
        if context.is_shutdown_requested() {
            context.set_next_state(StateKind::Terminal);
            return;
        }

        let response = shared.client.send_status_request();
        if let Some(config) = interpret_status_response(&response, &context.server_config()) {
            let capture = config.capture;
            context.set_server_config(config);
            context.set_last_status_check_ms(shared.clock.monotonic_millis());
            context.mark_init_completed(true);
            info!(attempt, capture, "initialization handshake complete");
            context.set_next_state(if capture {
                StateKind::CaptureOn
            } else {
                StateKind::CaptureOff
            });
            return;
        }

        let delay = if delay_index < INIT_BACKOFF_SCHEDULE.len() {
            INIT_BACKOFF_SCHEDULE[delay_index]
        } else {
            REINIT_DELAY
        };
        warn!(
            attempt,
            http_status = response.status,
            retry_in_ms = delay.as_millis() as u64,
            "initialization handshake failed"
        );
        if !context.sleep(delay) {
            context.set_next_state(StateKind::Terminal);
            return;
        }
        if delay_index < INIT_BACKOFF_SCHEDULE.len() {
            delay_index += 1;
        } else {
            // The long pause is over; restart the schedule from the top.
            delay_index = 0;
        }
        attempt += 1;
    }
}

// ----------------------------------------------------------------------------
// Capture On
// ----------------------------------------------------------------------------

/// One steady-state iteration: refresh the server configuration when due,
/// drain finished sessions, pace open-session beacons, sleep.
fn execute_capture_on(shared: &SenderShared) {
    let context = &shared.context;
    if context.is_shutdown_requested() {
        context.set_next_state(StateKind::FlushSessions);
        return;
    }

    refresh_status_if_due(shared);
    if !context.capture_enabled() {
        info!("server disabled capture");
        context.set_next_state(StateKind::CaptureOff);
        return;
    }

    send_finished_sessions(shared);
    send_open_sessions_if_due(shared);

    let send_interval = Duration::from_millis(context.server_config().send_interval_ms as u64);
    context.sleep(CAPTURE_ON_SLEEP.min(send_interval));
}

fn refresh_status_if_due(shared: &SenderShared) {
    let context = &shared.context;
    let interval_ms = shared.config.transport.status_check_interval.as_millis() as u64;
    let now = shared.clock.monotonic_millis();
    let due = context
        .last_status_check_ms()
        .map_or(true, |last| now.saturating_sub(last) >= interval_ms);
    if !due {
        return;
    }

    let response = shared.client.send_status_request();
    match interpret_status_response(&response, &context.server_config()) {
        Some(config) => {
            context.set_server_config(config);
            context.set_last_status_check_ms(shared.clock.monotonic_millis());
        }
        None => {
            // Keep capturing with the configuration we have.
            debug!(http_status = response.status, "status refresh failed");
        }
    }
}

fn send_finished_sessions(shared: &SenderShared) {
    let context = &shared.context;
    while let Some(key) = context.pop_finished_session() {
        if context.is_shutdown_requested() {
            context.push_finished_session_front(key);
            return;
        }
        match send_session_beacons(shared, key, true) {
            SendOutcome::Completed => {}
            SendOutcome::Deferred | SendOutcome::Failed => {
                context.push_finished_session_front(key);
                return;
            }
        }
    }
}

fn send_open_sessions_if_due(shared: &SenderShared) {
    let context = &shared.context;
    let interval_ms = context.server_config().send_interval_ms as u64;
    let now = shared.clock.monotonic_millis();
    let due = context
        .last_open_session_send_ms()
        .map_or(true, |last| now.saturating_sub(last) >= interval_ms);
    if !due {
        return;
    }

    for key in context.open_sessions_snapshot() {
        if context.is_shutdown_requested() {
            break;
        }
        // Open sessions keep their bucket: only the records that existed at
        // prepare time are transmitted, later inserts wait for the next pass.
        let _ = send_session_beacons(shared, key, false);
    }
    context.set_last_open_session_send_ms(shared.clock.monotonic_millis());
}

// ----------------------------------------------------------------------------
// Capture Off
// ----------------------------------------------------------------------------

/// Status-only polling. Buffered records stay cached; they are only dropped
/// if shutdown arrives while capture is still off.
fn execute_capture_off(shared: &SenderShared) {
    let context = &shared.context;
    if context.is_shutdown_requested() {
        context.set_next_state(StateKind::Terminal);
        return;
    }

    let interval_ms = shared.config.transport.status_check_interval.as_millis() as u64;
    let now = shared.clock.monotonic_millis();
    let elapsed = context
        .last_status_check_ms()
        .map_or(interval_ms, |last| now.saturating_sub(last));
    if elapsed < interval_ms {
        if !context.sleep(Duration::from_millis(interval_ms - elapsed)) {
            context.set_next_state(StateKind::Terminal);
            return;
        }
    }

    let response = shared.client.send_status_request();
    context.set_last_status_check_ms(shared.clock.monotonic_millis());
    if let Some(config) = interpret_status_response(&response, &context.server_config()) {
        let capture = config.capture;
        context.set_server_config(config);
        if capture {
            info!("server re-enabled capture");
            context.set_next_state(StateKind::CaptureOn);
        }
    }
}

// ----------------------------------------------------------------------------
// Flush Sessions
// ----------------------------------------------------------------------------

/// Single shutdown pass: finish every open session, then drain the queue
/// with per-iteration sleeping disabled. A session failing twice in a row
/// aborts the flush so shutdown stays bounded.
fn execute_flush(shared: &SenderShared) {
    let context = &shared.context;
    context.finish_all_open_sessions();

    if !context.capture_enabled() {
        while let Some(key) = context.pop_finished_session() {
            debug!(beacon_key = %key, "capture off, discarding buffered session data");
            shared.cache.delete_cache_entry(key);
            shared.registry.remove(key);
        }
        context.set_next_state(StateKind::Terminal);
        return;
    }

    let mut failures: HashMap<BeaconKey, u32> = HashMap::new();
    while let Some(key) = context.pop_finished_session() {
        match send_session_beacons(shared, key, true) {
            SendOutcome::Completed => {}
            SendOutcome::Deferred | SendOutcome::Failed => {
                let count = failures.entry(key).or_insert(0);
                *count += 1;
                if *count >= MAX_FLUSH_FAILURES_PER_SESSION {
                    warn!(beacon_key = %key, "session failed repeatedly, aborting flush");
                    break;
                }
                context.push_finished_session_front(key);
            }
        }
    }
    context.set_next_state(StateKind::Terminal);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
