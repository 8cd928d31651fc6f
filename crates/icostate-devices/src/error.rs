//! Errors of the stateful system layer.

use std::time::Duration;

use crate::adapter::DeviceError;
use crate::measurement::MeasurementError;
use crate::types::{MacAddress, NodeState};

/// Result type for [`crate::IcoSystem`] operations.
pub type SystemResult<T> = Result<T, SystemError>;

/// Error returned by [`crate::IcoSystem`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    /// State violation or listener failure
    #[error(transparent)]
    Core(#[from] icostate_core::Error),

    /// Failure reported by the device library, passed through unchanged
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("Invalid sensor node name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid ADC configuration: {0}")]
    InvalidAdcConfiguration(String),

    #[error("Invalid streaming configuration: {0}")]
    InvalidStreamingConfiguration(String),

    #[error("No measurement has been started")]
    NoActiveMeasurement,

    #[error("A measurement is already running")]
    MeasurementRunning,

    #[error("Connected sensor node {connected} does not match requested address {requested}")]
    SensorNodeMismatch {
        connected: MacAddress,
        requested: MacAddress,
    },

    #[error("STU not operating {timeout:?} after reset (last state: {last_state})")]
    ResetTimeout {
        timeout: Duration,
        last_state: NodeState,
    },

    #[error("Streaming task failed: {0}")]
    Streaming(String),
}

impl SystemError {
    /// Whether the error is a state violation.
    pub fn is_incorrect_state(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_incorrect_state())
    }

    /// Whether the error originates from the device library.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}
