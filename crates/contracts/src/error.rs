//! Layered error definitions
//!
//! Categorized by source: config / transport / lifecycle / stream

use thiserror::Error;

use crate::DeviceState;

/// Errors raised by a hardware transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Buffer allocation failed
    #[error("transfer buffer allocation failed for endpoint {endpoint}: {message}")]
    AllocationFailed { endpoint: usize, message: String },

    /// The device is gone
    #[error("device not attached")]
    NoDevice,

    /// The request was refused by the host stack
    #[error("isochronous read rejected (code {code}): {message}")]
    SubmitRejected { code: i32, message: String },

    /// The device clock could not be read
    #[error("device clock unavailable: {message}")]
    ClockUnavailable { message: String },
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors =====
    /// Hardware transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // ===== Lifecycle Errors =====
    /// Device state machine refused a transition
    #[error("illegal device state transition {from:?} -> {to:?}")]
    IllegalTransition { from: DeviceState, to: DeviceState },

    /// Operation requires a different device state
    #[error("operation '{operation}' not permitted in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    // ===== Stream Errors =====
    /// The synchronizer thread could not be started
    #[error("failed to spawn synchronizer thread: {message}")]
    ThreadSpawn { message: String },

    /// In-flight transfers did not drain before the deadline
    #[error("{in_flight} transfers still in flight after {waited_ms}ms")]
    DrainTimeout { in_flight: u32, waited_ms: u64 },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid state error
    pub fn invalid_state(operation: &'static str, state: DeviceState) -> Self {
        Self::InvalidState { operation, state }
    }
}
