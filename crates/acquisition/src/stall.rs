//! Stall detector
//!
//! Samples a checksum over every buffered sequence number at a low rate. If
//! the checksum stops changing for more than `threshold` consecutive samples
//! the transfer chain is assumed dead and must be rebuilt.

use contracts::StallConfig;

/// Verdict for one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    /// Buffers changed since the last sample
    Advancing,
    /// Unchanged for this many consecutive samples
    Suspect(u32),
    /// Unchanged for too long; reset the stream
    Stalled,
}

#[derive(Debug, Clone)]
pub struct StallDetector {
    check_interval: u64,
    threshold: u32,
    cycles_until_check: u64,
    last_checksum: Option<u64>,
    unchanged: u32,
}

impl StallDetector {
    pub fn new(config: &StallConfig) -> Self {
        let check_interval = config.check_interval_cycles.max(1);
        Self {
            check_interval,
            threshold: config.threshold,
            cycles_until_check: check_interval,
            last_checksum: None,
            unchanged: 0,
        }
    }

    /// Count one synchronizer cycle; true when a sample is due
    pub fn tick(&mut self) -> bool {
        self.cycles_until_check -= 1;
        if self.cycles_until_check == 0 {
            self.cycles_until_check = self.check_interval;
            true
        } else {
            false
        }
    }

    /// Compare `checksum` against the previous sample
    pub fn sample(&mut self, checksum: u64) -> StallVerdict {
        let unchanged = self.last_checksum == Some(checksum);
        self.last_checksum = Some(checksum);
        if !unchanged {
            self.unchanged = 0;
            return StallVerdict::Advancing;
        }
        self.unchanged += 1;
        if self.unchanged > self.threshold {
            self.unchanged = 0;
            StallVerdict::Stalled
        } else {
            StallVerdict::Suspect(self.unchanged)
        }
    }

    /// Consecutive unchanged samples so far
    pub fn unchanged_samples(&self) -> u32 {
        self.unchanged
    }
}
