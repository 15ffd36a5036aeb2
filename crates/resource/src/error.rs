use accel_core::{DeviceError, ResourceType};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResourceError {
    #[error("resource type {0} is not tracked on this device")]
    InvalidResourceType(ResourceType),

    #[error("insufficient {resource}: requested {requested}, free {free}")]
    InsufficientResources {
        resource: ResourceType,
        requested: u64,
        free: u64,
    },

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}
