//! StreamStats - acquisition counters snapshot

use serde::{Deserialize, Serialize};

use crate::DeviceState;

/// Point-in-time view of the acquisition counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Lifecycle state when the snapshot was taken
    pub state: DeviceState,

    /// Frames delivered to the listener
    pub frames_emitted: u64,

    /// Frames discarded during warm-up
    pub frames_discarded: u64,

    /// Sequence numbers skipped because an endpoint dropped the packet
    pub frames_dropped: u64,

    /// Reader resynchronizations after a sequence gap
    pub sequence_gaps: u64,

    /// Full transaction resets after a stall
    pub stall_resets: u64,

    /// Slots found refilled under the reader
    pub reader_overruns: u64,

    /// Transfers submitted
    pub transfers_submitted: u64,

    /// Transfers completed with success or underrun
    pub transfers_completed: u64,

    /// Transfers completed with underrun
    pub underruns: u64,

    /// Transfers dropped for timing (too old / too new)
    pub timing_errors: u64,

    /// Transfers completed with an unrecognised status
    pub unknown_errors: u64,

    /// Submissions the transport refused
    pub submit_failures: u64,

    /// Transfers currently outstanding
    pub in_flight: u32,

    /// Synchronizer cycles run
    pub cycles: u64,
}
