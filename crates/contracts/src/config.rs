//! Stream configuration contracts shared across crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Acquisition stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Transfer slots per endpoint
    pub buffer_count: usize,

    /// Packets (device frames) per transfer
    pub packets_per_transfer: usize,

    /// Transfers kept outstanding per endpoint
    pub lead_window: usize,

    /// Safety margin between the device clock and the first scheduled frame
    pub start_offset_frames: u64,

    /// Synchronizer poll interval in microseconds
    pub poll_interval_us: u64,

    /// Upper bound on positions a reader walks per synchronization attempt
    pub max_advance_steps: usize,

    /// Frames discarded after the first synchronization
    pub startup_frames: u32,

    /// Consecutive frameless cycles before the device is reported unresponsive
    pub unresponsive_cycles: u64,

    /// Bound on the teardown drain wait, in milliseconds
    pub drain_timeout_ms: u64,

    /// Run the synchronizer thread at elevated OS priority
    pub elevated_priority: bool,

    /// Carrier frequency indices sent to the device at setup
    pub carrier_frequencies: Vec<u8>,

    /// Stall detection
    pub stall: StallConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 8,
            packets_per_transfer: 20,
            lead_window: 4,
            start_offset_frames: 50,
            poll_interval_us: 500,
            max_advance_steps: 32,
            startup_frames: 50,
            unresponsive_cycles: 4000,
            drain_timeout_ms: 500,
            elevated_priority: true,
            carrier_frequencies: vec![6, 8, 10, 12, 14, 16, 18, 20, 22, 24, 26, 28, 30, 32, 34, 36],
            stall: StallConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Positions in one endpoint ring
    pub fn ring_positions(&self) -> usize {
        self.buffer_count * self.packets_per_transfer
    }

    /// Synchronizer poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// Teardown drain bound
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Device frames scheduled ahead of the oldest outstanding transfer
    pub fn lead_frames(&self) -> u64 {
        (self.lead_window * self.packets_per_transfer) as u64
    }

    /// Ring rules the acquisition core cannot run without
    ///
    /// `buffer_count > lead_window >= 1`: a re-arm targets the slot
    /// `lead_window` positions ahead, which must never be the slot that
    /// just completed.
    pub fn check(&self) -> Result<(), ContractError> {
        if self.lead_window == 0 {
            return Err(ContractError::config_validation(
                "lead_window",
                "lead_window must be >= 1",
            ));
        }
        if self.buffer_count <= self.lead_window {
            return Err(ContractError::config_validation(
                "buffer_count / lead_window",
                format!(
                    "buffer_count ({}) must be > lead_window ({})",
                    self.buffer_count, self.lead_window
                ),
            ));
        }
        if self.packets_per_transfer == 0 {
            return Err(ContractError::config_validation(
                "packets_per_transfer",
                "packets_per_transfer must be > 0",
            ));
        }
        Ok(())
    }
}

/// Stall detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StallConfig {
    /// Synchronizer cycles between checksum samples
    pub check_interval_cycles: u64,

    /// Identical samples tolerated before a full reset
    pub threshold: u32,
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            check_interval_cycles: 100,
            threshold: 8,
        }
    }
}
