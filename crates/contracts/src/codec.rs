//! 12-bit taxel codec
//!
//! Two taxels share three bytes:
//!
//! ```text
//! byte0 = a[7:0]
//! byte1 = b[3:0] << 4 | a[11:8]
//! byte2 = b[11:4]
//! ```
//!
//! Taxel `k` of an endpoint packet sits at row `k / 32`, column `k % 32`.
//! Endpoint `e` owns surface columns `e * 32 .. (e + 1) * 32`.

use crate::{
    COLUMNS_PER_ENDPOINT, PACKED_PAYLOAD_BYTES, SENSOR_COLUMNS, TAXELS_PER_ENDPOINT,
};

/// Full-scale raw value
pub const RAW_MAX: u16 = 0x0FFF;

const SCALE: f32 = 1.0 / 4096.0;

/// Unpack 256 raw 12-bit values
pub fn unpack_raw(payload: &[u8; PACKED_PAYLOAD_BYTES], out: &mut [u16; TAXELS_PER_ENDPOINT]) {
    for (pair, bytes) in out.chunks_exact_mut(2).zip(payload.chunks_exact(3)) {
        let (b0, b1, b2) = (bytes[0] as u16, bytes[1] as u16, bytes[2] as u16);
        pair[0] = b0 | (b1 & 0x0F) << 8;
        pair[1] = (b1 >> 4) | b2 << 4;
    }
}

/// Pack 256 raw values; bits above 12 are dropped
pub fn pack_raw(values: &[u16; TAXELS_PER_ENDPOINT], out: &mut [u8; PACKED_PAYLOAD_BYTES]) {
    for (pair, bytes) in values.chunks_exact(2).zip(out.chunks_exact_mut(3)) {
        let a = pair[0] & RAW_MAX;
        let b = pair[1] & RAW_MAX;
        bytes[0] = (a & 0xFF) as u8;
        bytes[1] = ((a >> 8) as u8) | ((b & 0x0F) as u8) << 4;
        bytes[2] = (b >> 4) as u8;
    }
}

/// Decode one endpoint packet into its columns of a row-major surface
///
/// `taxels` must hold `SENSOR_ROWS * SENSOR_COLUMNS` values.
pub fn decode_into(payload: &[u8; PACKED_PAYLOAD_BYTES], endpoint: usize, taxels: &mut [f32]) {
    let mut raw = [0u16; TAXELS_PER_ENDPOINT];
    unpack_raw(payload, &mut raw);
    let column_base = endpoint * COLUMNS_PER_ENDPOINT;
    for (k, value) in raw.iter().enumerate() {
        let row = k / COLUMNS_PER_ENDPOINT;
        let column = column_base + k % COLUMNS_PER_ENDPOINT;
        taxels[row * SENSOR_COLUMNS + column] = *value as f32 * SCALE;
    }
}
