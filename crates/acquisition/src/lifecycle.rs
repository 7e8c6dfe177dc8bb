//! Device lifecycle state machine
//!
//! Transitions are serialized by a mutex. A mirrored atomic lets the
//! completion context and the synchronizer loop gate on the state without
//! taking the lock.

use std::sync::atomic::{AtomicU8, Ordering};

use contracts::{ContractError, DeviceState};
use parking_lot::Mutex;
use tracing::info;

/// Shared lifecycle state
#[derive(Debug, Default)]
pub struct DeviceLifecycle {
    state: Mutex<DeviceState>,
    snapshot: AtomicU8,
}

impl DeviceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, lock-free
    #[inline]
    pub fn state(&self) -> DeviceState {
        DeviceState::from_u8(self.snapshot.load(Ordering::Acquire))
    }

    /// Whether transfers may be scheduled right now
    #[inline]
    pub fn permits_transfers(&self) -> bool {
        self.state().permits_transfers()
    }

    /// Move to `to`, failing on an illegal edge. Returns the previous state.
    pub fn transition(&self, to: DeviceState) -> Result<DeviceState, ContractError> {
        let mut state = self.state.lock();
        let from = *state;
        if !from.can_transition_to(to) {
            return Err(ContractError::IllegalTransition { from, to });
        }
        *state = to;
        self.snapshot.store(to as u8, Ordering::Release);
        drop(state);

        info!(from = ?from, to = ?to, "Device state changed");
        metrics::gauge!("taxel_stream_device_state").set(to as u8 as f64);
        Ok(from)
    }

    /// `Connected -> HasSync` from the completion context
    ///
    /// Never blocks: if the lock is held, a later completion retries.
    pub fn try_promote(&self) -> bool {
        if self.state() != DeviceState::Connected {
            return false;
        }
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if *state != DeviceState::Connected {
            return false;
        }
        *state = DeviceState::HasSync;
        self.snapshot
            .store(DeviceState::HasSync as u8, Ordering::Release);
        true
    }

    /// Enter `Closing` from any streaming state
    ///
    /// After this returns no new transfer can be scheduled.
    pub fn begin_closing(&self) -> Result<DeviceState, ContractError> {
        let state = self.state();
        if !state.permits_transfers() {
            return Err(ContractError::invalid_state("begin_closing", state));
        }
        self.transition(DeviceState::Closing)
    }
}
