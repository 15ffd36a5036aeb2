pub mod config;
pub mod device;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod tuning;
pub mod types;

pub use config::{
    AccelConfig, AdmissionPolicy, CacheConfig, DeviceConfig, MonitorConfig, RecoveryConfig,
    ResourceConfig, SchedulerConfig, TuningConfig,
};
pub use device::{DeviceControl, DeviceError, SimulatedDevice};
pub use error::AccelError;
pub use failure::{Failure, FailureType};
pub use metrics::{MetricsError, MetricsSnapshot, MetricsSource};
pub use tuning::{TuningError, TuningKnob};
pub use types::{ResourceLimits, ResourceRequest, ResourceType};
