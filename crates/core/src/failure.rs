use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a device-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    /// Device ran out of memory.
    Oom,
    /// Hardware fault (ECC error, fallen off the bus, ...).
    Hardware,
    /// Driver fault.
    Driver,
    /// Kernel / compute error.
    Compute,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Oom => f.write_str("oom"),
            FailureType::Hardware => f.write_str("hardware"),
            FailureType::Driver => f.write_str("driver"),
            FailureType::Compute => f.write_str("compute"),
        }
    }
}

/// A failure observed at some failure site, handed to the recovery manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureType,
    /// Rendered underlying error.
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub device: String,
    /// Free-form context (task id, allocation size, ...).
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl Failure {
    pub fn new(kind: FailureType, device: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            kind,
            error: error.to_string(),
            timestamp: Utc::now(),
            device: device.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure on {}: {}", self.kind, self.device, self.error)
    }
}
