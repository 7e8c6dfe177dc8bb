//! Transaction scheduler
//!
//! Keeps `lead_window` isochronous reads outstanding per endpoint. Every
//! completed slot immediately re-arms the slot `lead_window` positions ahead,
//! targeting the next frames of that endpoint's running device-clock counter.
//!
//! Completions are tagged with a schedule epoch. A reset bumps the epoch, so
//! completions of the abandoned chain never re-arm and never mark slots
//! readable.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use contracts::{
    ContractError, IsochRead, SlotId, TransferCompletion, TransferContext, TransferStatus,
    UsbTransport,
};
use tracing::{debug, instrument, warn};

use crate::counters::StreamCounters;
use crate::lifecycle::DeviceLifecycle;
use crate::slots::SlotTable;

/// Scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleParams {
    /// Reads kept outstanding per endpoint
    pub lead_window: usize,
    /// Margin between the device clock and the first scheduled frame
    pub start_offset_frames: u64,
}

/// Issues and re-arms isochronous reads
pub struct TransactionScheduler {
    transport: Arc<dyn UsbTransport>,
    slots: Arc<SlotTable>,
    lifecycle: Arc<DeviceLifecycle>,
    counters: Arc<StreamCounters>,
    params: ScheduleParams,
    /// Next device frame to request, per endpoint
    next_frame: Vec<AtomicU64>,
    epoch: AtomicU32,
    /// Completion sink handed to the transport
    this: Weak<TransactionScheduler>,
}

impl std::fmt::Debug for TransactionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScheduler")
            .field("params", &self.params)
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransactionScheduler {
    pub fn new(
        transport: Arc<dyn UsbTransport>,
        slots: Arc<SlotTable>,
        lifecycle: Arc<DeviceLifecycle>,
        counters: Arc<StreamCounters>,
        params: ScheduleParams,
    ) -> Arc<Self> {
        let endpoints = slots.endpoint_count();
        Arc::new_cyclic(|this| Self {
            transport,
            slots,
            lifecycle,
            counters,
            params,
            next_frame: (0..endpoints).map(|_| AtomicU64::new(0)).collect(),
            epoch: AtomicU32::new(0),
            this: this.clone(),
        })
    }

    /// Current schedule epoch
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Next device frame that would be requested for `endpoint`
    pub fn next_frame(&self, endpoint: usize) -> Option<u64> {
        self.next_frame
            .get(endpoint)
            .map(|frame| frame.load(Ordering::Acquire))
    }

    /// Issue one read for `slot`, continuing its endpoint's frame counter
    ///
    /// Rejected without side effects unless the device is `Connected` or
    /// `HasSync`. A transport refusal is returned to the caller and counted;
    /// the slot goes back to idle and is not retried.
    pub fn schedule_transfer(&self, slot: SlotId, epoch: u32) -> Result<(), ContractError> {
        let state = self.lifecycle.state();
        if !state.permits_transfers() {
            return Err(ContractError::invalid_state("schedule_transfer", state));
        }
        let (Some(target), Some(counter)) = (self.slots.slot(slot), self.next_frame.get(slot.endpoint))
        else {
            return Err(ContractError::Other(format!("unknown transfer slot {slot}")));
        };
        let Some(completion) = self.this.upgrade() else {
            return Err(ContractError::Other("scheduler dropped".to_string()));
        };

        let packet_count = self.slots.geometry().packets_per_buffer;
        let frame_time = counter.fetch_add(packet_count as u64, Ordering::AcqRel);

        target.arm(epoch);
        self.counters.record_submitted();

        let read = IsochRead {
            context: TransferContext { slot, epoch },
            frame_time,
            packet_count,
            buffer: Arc::clone(target.buffer()),
            completion,
        };
        if let Err(e) = self.transport.submit_isochronous_read(read) {
            target.disarm(epoch);
            self.counters.record_submit_failure();
            return Err(e.into());
        }
        Ok(())
    }

    /// Align every endpoint to `clock + start_offset` and fill the lead window
    ///
    /// Used at startup and after a stall reset.
    #[instrument(name = "scheduler_arm_window", skip(self))]
    pub fn arm_window(&self, epoch: u32) -> Result<(), ContractError> {
        let clock = self.transport.current_device_clock()?;
        let start = clock + self.params.start_offset_frames;

        for counter in &self.next_frame {
            counter.store(start, Ordering::Release);
        }
        let mut armed = 0usize;
        for endpoint in 0..self.slots.endpoint_count() {
            for buffer in 0..self.params.lead_window {
                match self.schedule_transfer(SlotId { endpoint, buffer }, epoch) {
                    Ok(()) => armed += 1,
                    Err(e @ ContractError::InvalidState { .. }) => return Err(e),
                    Err(e) => warn!(endpoint, buffer, error = %e, "Initial read not queued"),
                }
            }
        }
        debug!(clock, start, armed, "Lead window armed");
        Ok(())
    }

    /// Abandon every outstanding read and start a fresh chain
    ///
    /// Bumps the epoch, clears the in-flight count, marks every slot idle
    /// and re-arms the lead window from the current device clock.
    #[instrument(name = "scheduler_reset", skip(self))]
    pub fn reset(&self) -> Result<u32, ContractError> {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.counters.clear_in_flight();
        self.slots.invalidate_all(epoch);
        self.arm_window(epoch)?;
        Ok(epoch)
    }

    fn rearm_after(&self, slot: SlotId, epoch: u32) {
        let buffer_count = self.slots.geometry().buffer_count;
        let next = SlotId {
            endpoint: slot.endpoint,
            buffer: (slot.buffer + self.params.lead_window) % buffer_count,
        };
        // Failures are already counted; the stall detector recovers the chain
        let _ = self.schedule_transfer(next, epoch);
    }
}

impl TransferCompletion for TransactionScheduler {
    fn on_transfer_complete(&self, context: TransferContext, status: TransferStatus) {
        if context.epoch == self.epoch.load(Ordering::Acquire) {
            self.counters.record_completion();
            self.complete_current(context, status);
        }
        // Last: a re-arm submitted above is already counted, so a draining
        // teardown never sees zero outstanding while this callback can submit.
        self.counters.record_retired();
    }
}

impl TransactionScheduler {
    fn complete_current(&self, context: TransferContext, status: TransferStatus) {
        let Some(slot) = self.slots.slot(context.slot) else {
            return;
        };

        match status {
            TransferStatus::Success | TransferStatus::Underrun => {
                self.counters
                    .record_transfer_ok(status == TransferStatus::Underrun);
                slot.complete(context.epoch);
                self.lifecycle.try_promote();
                self.rearm_after(context.slot, context.epoch);
            }
            TransferStatus::IsoTooOld | TransferStatus::IsoTooNew => {
                // Dropped, never retried. Its packets read as missing.
                self.counters.record_timing_error();
                slot.complete(context.epoch);
            }
            TransferStatus::Aborted => {}
            TransferStatus::Unknown(_) | TransferStatus::Pending => {
                self.counters.record_unknown_error();
                slot.complete(context.epoch);
                self.rearm_after(context.slot, context.epoch);
            }
        }
    }
}
