//! Deterministic taxel test pattern
//!
//! Every packet's payload is a function of its sequence number and endpoint,
//! so a consumer can verify that a fused frame was assembled from the right
//! packets without knowing anything about the transport.

use contracts::{
    codec, IsochPacket, Seq, SensorFrame, COLUMNS_PER_ENDPOINT, ENDPOINT_COUNT, PACKET_BYTES,
    SENSOR_COLUMNS, TAXELS_PER_ENDPOINT,
};

/// Raw 12-bit value of taxel `index` in the packet `(sequence, endpoint)`
#[inline]
pub fn taxel_value(sequence: Seq, endpoint: usize, index: usize) -> u16 {
    let mixed = (sequence.0 as usize).wrapping_mul(7) + endpoint * 1031 + index * 13;
    (mixed & codec::RAW_MAX as usize) as u16
}

/// Write a full packet carrying the pattern for `sequence`
pub fn encode_packet(packet: &mut IsochPacket, sequence: Seq, endpoint: usize, timestamp: u64) {
    let mut raw = [0u16; TAXELS_PER_ENDPOINT];
    for (index, value) in raw.iter_mut().enumerate() {
        *value = taxel_value(sequence, endpoint, index);
    }
    codec::pack_raw(&raw, &mut packet.payload);
    packet.sequence = sequence;
    packet.actual_bytes = PACKET_BYTES as u16;
    packet.timestamp = timestamp;
}

/// Whether every taxel of `frame` matches the pattern for its sequence number
pub fn frame_matches(frame: &SensorFrame) -> bool {
    (0..ENDPOINT_COUNT).all(|endpoint| {
        (0..TAXELS_PER_ENDPOINT).all(|index| {
            let row = index / COLUMNS_PER_ENDPOINT;
            let column = endpoint * COLUMNS_PER_ENDPOINT + index % COLUMNS_PER_ENDPOINT;
            let decoded = (frame.taxels[row * SENSOR_COLUMNS + column] * 4096.0).round() as u16;
            decoded == taxel_value(frame.sequence, endpoint, index)
        })
    })
}
