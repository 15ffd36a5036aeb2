use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TuningError {
    #[error("reduction fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),

    #[error("knob {0} is locked")]
    Locked(String),

    #[error("{0}")]
    Other(String),
}

/// An externally adjustable workload parameter (batch size, memory fraction, ...).
///
/// Recovery and reclamation paths may call `reduce_knob` concurrently and in
/// quick succession; implementations must tolerate that.
pub trait TuningKnob: Send + Sync {
    fn name(&self) -> &str;

    /// Shrink the knob by `fraction` of its current value (0.3 = 30% smaller).
    fn reduce_knob(&self, fraction: f64) -> Result<(), TuningError>;
}
