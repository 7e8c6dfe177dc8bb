//! DeviceState - lifecycle states
//!
//! `NoDevice -> Connected -> HasSync -> Closing -> NoDevice`

use serde::{Deserialize, Serialize};

/// Device lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceState {
    /// Nothing attached, nothing allocated
    #[default]
    NoDevice = 0,
    /// Buffers allocated, transfers armed, no completion seen yet
    Connected = 1,
    /// Transfers completing, synchronizer producing frames
    HasSync = 2,
    /// Tearing down; no new transfers may be scheduled
    Closing = 3,
}

impl DeviceState {
    /// Whether the transition `self -> to` is legal
    pub fn can_transition_to(self, to: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, to),
            (NoDevice, Connected)
                | (Connected, HasSync)
                | (Connected, Closing)
                | (HasSync, Closing)
                | (Closing, NoDevice)
        )
    }

    /// Whether transfers may be scheduled in this state
    pub fn permits_transfers(self) -> bool {
        matches!(self, DeviceState::Connected | DeviceState::HasSync)
    }

    /// Decode from the atomic representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => DeviceState::Connected,
            2 => DeviceState::HasSync,
            3 => DeviceState::Closing,
            _ => DeviceState::NoDevice,
        }
    }
}
