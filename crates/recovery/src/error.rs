use accel_core::{DeviceError, FailureType, TuningError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("no recovery strategy handles {0} failures")]
    Unhandled(FailureType),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("tuning error: {0}")]
    Tuning(#[from] TuningError),

    #[error("host fallback failed: {0}")]
    Fallback(String),
}
