//! IsochPacket - raw per-frame hardware packet
//!
//! One packet arrives per endpoint per device frame. The wire layout is the
//! packed taxel payload followed by a little-endian sequence number and two
//! reserved bytes.

use serde::{Deserialize, Serialize};

use crate::{Seq, TAXELS_PER_ENDPOINT};

/// Packed payload size: 12 bits per taxel
pub const PACKED_PAYLOAD_BYTES: usize = TAXELS_PER_ENDPOINT * 3 / 2;

/// Full packet size on the wire
pub const PACKET_BYTES: usize = PACKED_PAYLOAD_BYTES + 4;

/// Completion status reported by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Nothing has been reported yet
    #[default]
    Pending,
    /// Completed normally
    Success,
    /// Fewer bytes than requested; tolerated
    Underrun,
    /// Target frame already passed when the request reached the bus
    IsoTooOld,
    /// Target frame too far in the future to be queued
    IsoTooNew,
    /// Request aborted, usually because the device went away
    Aborted,
    /// Anything else the hardware stack reports
    Unknown(i32),
}

impl TransferStatus {
    /// Timing errors: the transfer is dropped, never retried
    pub fn is_timing_error(self) -> bool {
        matches!(self, Self::IsoTooOld | Self::IsoTooNew)
    }
}

/// One isochronous packet with its completion metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsochPacket {
    /// Packed 12-bit taxel data
    pub payload: [u8; PACKED_PAYLOAD_BYTES],

    /// Wrapping sequence number stamped by the device
    pub sequence: Seq,

    /// Bytes actually received for this frame
    pub actual_bytes: u16,

    /// Per-packet completion status
    pub status: TransferStatus,

    /// Device clock frame at which the packet completed
    pub timestamp: u64,
}

impl Default for IsochPacket {
    fn default() -> Self {
        Self {
            payload: [0; PACKED_PAYLOAD_BYTES],
            sequence: Seq(0),
            actual_bytes: 0,
            status: TransferStatus::Pending,
            timestamp: 0,
        }
    }
}

impl IsochPacket {
    /// Whether the whole packet, up to and including its last byte, arrived
    #[inline]
    pub fn is_received(&self) -> bool {
        self.actual_bytes as usize == PACKET_BYTES
    }

    /// Mark the packet as not received, keeping its stale contents
    #[inline]
    pub fn clear_received(&mut self) {
        self.actual_bytes = 0;
    }

    /// Fill from wire bytes
    ///
    /// `bytes` is whatever the host controller delivered for this frame. Short
    /// deliveries keep their byte count and are later skipped as dropped.
    pub fn fill_from_wire(&mut self, bytes: &[u8], timestamp: u64) {
        self.actual_bytes = bytes.len().min(PACKET_BYTES) as u16;
        self.timestamp = timestamp;
        if bytes.len() >= PACKET_BYTES {
            self.payload.copy_from_slice(&bytes[..PACKED_PAYLOAD_BYTES]);
            self.sequence = Seq(u16::from_le_bytes([
                bytes[PACKED_PAYLOAD_BYTES],
                bytes[PACKED_PAYLOAD_BYTES + 1],
            ]));
            self.status = TransferStatus::Success;
        } else {
            self.status = TransferStatus::Underrun;
        }
    }

    /// Serialize to the wire layout
    pub fn to_wire(&self) -> [u8; PACKET_BYTES] {
        let mut out = [0u8; PACKET_BYTES];
        out[..PACKED_PAYLOAD_BYTES].copy_from_slice(&self.payload);
        out[PACKED_PAYLOAD_BYTES..PACKED_PAYLOAD_BYTES + 2]
            .copy_from_slice(&self.sequence.0.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_sizes() {
        assert_eq!(PACKED_PAYLOAD_BYTES, 384);
        assert_eq!(PACKET_BYTES, 388);
    }

    #[test]
    fn test_fill_from_wire() {
        let mut src = IsochPacket::default();
        src.payload[0] = 0xAB;
        src.sequence = Seq(0x1234);
        let wire = src.to_wire();

        let mut dst = IsochPacket::default();
        dst.fill_from_wire(&wire, 77);
        assert!(dst.is_received());
        assert_eq!(dst.sequence, Seq(0x1234));
        assert_eq!(dst.payload[0], 0xAB);
        assert_eq!(dst.timestamp, 77);
    }

    #[test]
    fn test_short_delivery_is_not_received() {
        let mut dst = IsochPacket::default();
        dst.fill_from_wire(&[0u8; 100], 5);
        assert!(!dst.is_received());
        assert_eq!(dst.status, TransferStatus::Underrun);
        assert_eq!(dst.actual_bytes, 100);
    }

    #[test]
    fn test_timing_errors() {
        assert!(TransferStatus::IsoTooOld.is_timing_error());
        assert!(TransferStatus::IsoTooNew.is_timing_error());
        assert!(!TransferStatus::Aborted.is_timing_error());
        assert!(!TransferStatus::Unknown(-5).is_timing_error());
    }
}
