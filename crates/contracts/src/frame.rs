//! SensorFrame - Frame Synchronizer output
//!
//! One fused, ordered unit of surface data.

use serde::{Deserialize, Serialize};

use crate::Seq;

/// Surface width in taxels
pub const SENSOR_COLUMNS: usize = 64;

/// Surface height in taxels
pub const SENSOR_ROWS: usize = 8;

/// Number of isochronous endpoints (one per sensor board)
pub const ENDPOINT_COUNT: usize = 2;

/// Columns contributed by each endpoint
pub const COLUMNS_PER_ENDPOINT: usize = SENSOR_COLUMNS / ENDPOINT_COUNT;

/// Taxels carried by one endpoint packet
pub const TAXELS_PER_ENDPOINT: usize = COLUMNS_PER_ENDPOINT * SENSOR_ROWS;

/// Fused sensor frame
///
/// Row-major intensities in `[0, 1)`. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Sequence number both endpoints agreed on
    pub sequence: Seq,

    /// `SENSOR_ROWS * SENSOR_COLUMNS` intensities, row-major
    pub taxels: Vec<f32>,
}

impl SensorFrame {
    /// Create an all-zero frame
    pub fn zeroed(sequence: Seq) -> Self {
        Self {
            sequence,
            taxels: vec![0.0; SENSOR_ROWS * SENSOR_COLUMNS],
        }
    }

    /// Intensity at (column, row)
    #[inline]
    pub fn get(&self, column: usize, row: usize) -> f32 {
        self.taxels[row * SENSOR_COLUMNS + column]
    }

    /// Sum over the whole surface
    pub fn total_pressure(&self) -> f32 {
        self.taxels.iter().sum()
    }

    /// Largest single intensity
    pub fn peak(&self) -> f32 {
        self.taxels.iter().copied().fold(0.0, f32::max)
    }
}
