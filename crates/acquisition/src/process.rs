//! Synchronizer process loop
//!
//! Busy-polls the frame synchronizer at a fixed interval and runs the stall
//! detector every `check_interval_cycles` cycles. Error notices found during
//! a cycle reach the listener at the end of that cycle.

use std::sync::Arc;
use std::time::Duration;

use contracts::{DeviceState, ErrorCode};
use spin_sleep::{SpinSleeper, SpinStrategy};
use tracing::{debug, error, instrument, warn};

use crate::counters::StreamCounters;
use crate::lifecycle::DeviceLifecycle;
use crate::scheduler::TransactionScheduler;
use crate::slots::SlotTable;
use crate::stall::{StallDetector, StallVerdict};
use crate::synchronizer::{CycleOutcome, FrameSynchronizer};

/// Spin for the last 100µs of each sleep
const SPIN_NS: u32 = 100_000;

/// Frame synchronizer plus stall detector, driven from one thread
pub struct ProcessLoop {
    synchronizer: FrameSynchronizer,
    stall: StallDetector,
    scheduler: Arc<TransactionScheduler>,
    slots: Arc<SlotTable>,
    lifecycle: Arc<DeviceLifecycle>,
    counters: Arc<StreamCounters>,
    poll_interval: Duration,
    /// Last state written to the device-state gauge
    published_state: DeviceState,
}

impl ProcessLoop {
    pub fn new(
        synchronizer: FrameSynchronizer,
        stall: StallDetector,
        scheduler: Arc<TransactionScheduler>,
        slots: Arc<SlotTable>,
        lifecycle: Arc<DeviceLifecycle>,
        counters: Arc<StreamCounters>,
        poll_interval: Duration,
    ) -> Self {
        let published_state = lifecycle.state();
        Self {
            synchronizer,
            stall,
            scheduler,
            slots,
            lifecycle,
            counters,
            poll_interval,
            published_state,
        }
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.synchronizer
    }

    pub fn stall_detector(&self) -> &StallDetector {
        &self.stall
    }

    /// One synchronizer cycle, a stall check when due, then pending reports
    ///
    /// A no-op once the device has left `Connected` / `HasSync`.
    pub fn cycle(&mut self) -> CycleOutcome {
        if !self.lifecycle.permits_transfers() {
            return CycleOutcome::Inactive;
        }

        let outcome = self.synchronizer.run_cycle();
        self.publish_state();

        if self.stall.tick() {
            let checksum = self.slots.sequence_checksum();
            match self.stall.sample(checksum) {
                StallVerdict::Stalled => self.reset_stream(),
                StallVerdict::Suspect(samples) => {
                    debug!(samples, "Buffers unchanged since last check")
                }
                StallVerdict::Advancing => {}
            }
            metrics::gauge!("taxel_stream_in_flight").set(self.counters.in_flight() as f64);
        }

        self.synchronizer.flush_reports();
        outcome
    }

    /// Run until the device leaves the streaming states
    pub fn run(mut self) {
        let sleeper = SpinSleeper::new(SPIN_NS).with_spin_strategy(SpinStrategy::YieldThread);
        debug!(interval_us = self.poll_interval.as_micros() as u64, "Synchronizer loop started");

        while self.lifecycle.permits_transfers() {
            self.cycle();
            sleeper.sleep(self.poll_interval);
        }

        debug!(
            state = ?self.lifecycle.state(),
            last = %self.synchronizer.last_emitted(),
            "Synchronizer loop stopped"
        );
    }

    /// `Connected -> HasSync` happens in the completion context, which
    /// records no metrics; the gauge is brought up to date from here.
    fn publish_state(&mut self) {
        let state = self.lifecycle.state();
        if state != self.published_state {
            self.published_state = state;
            metrics::gauge!("taxel_stream_device_state").set(state as u8 as f64);
        }
    }

        /// Rebuild the transfer chain and relocate readers onto fresh data
    #[instrument(name = "process_reset_stream", skip(self))]
    fn reset_stream(&mut self) {
        warn!("Stream stalled, resetting transaction schedule");
        match self.scheduler.reset() {
            Ok(epoch) => {
                self.counters.record_stall_reset();
                metrics::counter!("taxel_stream_events_total", "event" => "stall_reset")
                    .increment(1);
                self.synchronizer.invalidate();
                self.synchronizer.report(
                    ErrorCode::StreamStall,
                    format!("stream stalled; transfers rescheduled (epoch {epoch})"),
                );
            }
            Err(e) => {
                error!(error = %e, "Transaction reset failed");
                self.synchronizer.report(
                    ErrorCode::StreamStall,
                    format!("stream stalled; reset failed: {e}"),
                );
            }
        }
    }
}
