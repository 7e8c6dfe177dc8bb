//! FrameListener trait - consumer boundary
//!
//! Invoked from the synchronizer thread (frames, errors, startup) and from the
//! teardown path (`on_close`). Callbacks must return quickly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SensorFrame;

/// Non-fatal stream error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A reader saw an out-of-order sequence number; readers were resynchronized
    SequenceGap,
    /// The stream stopped advancing; the transaction schedule was reset
    StreamStall,
    /// The completion callback counted unknown hardware errors
    TransferErrors,
    /// A slot was refilled while the reader still pointed at it
    ReaderOverrun,
    /// No frame for too many consecutive cycles
    Unresponsive,
}

impl ErrorCode {
    /// Stable numeric code
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::SequenceGap => 1,
            ErrorCode::StreamStall => 2,
            ErrorCode::TransferErrors => 3,
            ErrorCode::ReaderOverrun => 4,
            ErrorCode::Unresponsive => 5,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::SequenceGap => "sequence_gap",
            ErrorCode::StreamStall => "stream_stall",
            ErrorCode::TransferErrors => "transfer_errors",
            ErrorCode::ReaderOverrun => "reader_overrun",
            ErrorCode::Unresponsive => "unresponsive",
        };
        f.write_str(name)
    }
}

/// Stream consumer
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl FrameListener for Printer {
///     fn on_frame(&self, frame: &SensorFrame) {
///         println!("{} peak={}", frame.sequence, frame.peak());
///     }
/// }
/// ```
pub trait FrameListener: Send + Sync {
    /// First successful synchronization, after warm-up
    fn on_startup(&self) {}

    /// One fused frame, in sequence order
    fn on_frame(&self, frame: &SensorFrame);

    /// Non-fatal error notice
    fn on_error(&self, code: ErrorCode, message: &str) {
        let _ = (code, message);
    }

    /// The device is going away; stop referencing hardware resources
    fn on_close(&self) {}
}
