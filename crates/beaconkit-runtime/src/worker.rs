//! Sender worker thread
//!
//! One dedicated thread drives the state machine: execute the current state,
//! repeat until Terminal. A panicking state is contained, logged and turned
//! into a Terminal transition so `shutdown()` always joins.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{error, info};

use beaconkit_core::BeaconError;

use crate::context::SendingContext;
use crate::states::{self, SenderShared};

/// Owns the sender thread; joined via [`SenderWorker::join`]
#[derive(Debug)]
pub(crate) struct SenderWorker {
    context: Arc<SendingContext>,
    handle: Option<JoinHandle<()>>,
}

impl SenderWorker {
    /// Spawn the sender thread
    pub fn spawn(shared: SenderShared) -> Result<Self, BeaconError> {
        let context = shared.context.clone();
        let handle = std::thread::Builder::new()
            .name("beaconkit-sender".into())
            .spawn(move || run(shared))?;
        Ok(Self {
            context,
            handle: Some(handle),
        })
    }

    /// Join the sender thread. The caller must have requested shutdown
    /// first, otherwise this blocks until the server tells us to stop.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("sender thread panicked outside of state execution");
                self.context.mark_terminated();
            }
        }
    }
}

fn run(shared: SenderShared) {
    info!("beacon sender thread started");
    while !shared.context.current_state().is_terminal() {
        let state = shared.context.current_state();
        let result = panic::catch_unwind(AssertUnwindSafe(|| states::execute(&shared)));
        if result.is_err() {
            error!(state = state.name(), "sender state panicked, terminating");
            shared.context.force_terminal();
        }
    }
    shared.context.mark_terminated();
    info!("beacon sender thread stopped");
}
