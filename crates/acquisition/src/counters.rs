//! Lock-free stream counters
//!
//! Written from the completion context and the synchronizer thread, read by
//! anyone through [`StreamCounters::snapshot`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use contracts::{DeviceState, StreamStats};

/// Shared acquisition counters
#[derive(Debug, Default)]
pub struct StreamCounters {
    frames_emitted: AtomicU64,
    frames_discarded: AtomicU64,
    frames_dropped: AtomicU64,
    sequence_gaps: AtomicU64,
    stall_resets: AtomicU64,
    reader_overruns: AtomicU64,
    transfers_submitted: AtomicU64,
    transfers_completed: AtomicU64,
    underruns: AtomicU64,
    timing_errors: AtomicU64,
    unknown_errors: AtomicU64,
    submit_failures: AtomicU64,
    cycles: AtomicU64,
    /// Scheduling view of outstanding transfers; cleared on reset
    in_flight: AtomicU32,
    /// Submissions not yet completed; never cleared, gates buffer release
    outstanding: AtomicU32,
}

/// Decrement without going below zero
#[inline]
fn saturating_decrement(counter: &AtomicU32) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_submitted(&self) {
        self.transfers_submitted.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// Undo [`record_submitted`](Self::record_submitted) for a refused request
    #[inline]
    pub fn record_submit_failure(&self) {
        self.transfers_submitted.fetch_sub(1, Ordering::Relaxed);
        self.submit_failures.fetch_add(1, Ordering::Relaxed);
        saturating_decrement(&self.in_flight);
        saturating_decrement(&self.outstanding);
    }

    /// A completion of the current schedule arrived, whatever its status
    #[inline]
    pub fn record_completion(&self) {
        saturating_decrement(&self.in_flight);
    }

    /// The transport is finished with a read, whatever its epoch
    #[inline]
    pub fn record_retired(&self) {
        saturating_decrement(&self.outstanding);
    }

    #[inline]
    pub fn record_transfer_ok(&self, underrun: bool) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
        if underrun {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_timing_error(&self) {
        self.timing_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_error(&self) {
        self.unknown_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_emitted(&self) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_overrun(&self) {
        self.reader_overruns.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stall_reset(&self) {
        self.stall_resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Forget every outstanding transfer for scheduling purposes
    pub fn clear_in_flight(&self) {
        self.in_flight.store(0, Ordering::Release);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn unknown_errors(&self) -> u64 {
        self.unknown_errors.load(Ordering::Relaxed)
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    /// Copy every counter into a [`StreamStats`]
    pub fn snapshot(&self, state: DeviceState) -> StreamStats {
        StreamStats {
            state,
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            stall_resets: self.stall_resets.load(Ordering::Relaxed),
            reader_overruns: self.reader_overruns.load(Ordering::Relaxed),
            transfers_submitted: self.transfers_submitted.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            timing_errors: self.timing_errors.load(Ordering::Relaxed),
            unknown_errors: self.unknown_errors.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}
