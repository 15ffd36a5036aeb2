use std::sync::Arc;

use accel_core::{DeviceControl, Failure, FailureType};
use async_trait::async_trait;
use tracing::info;

use crate::error::RecoveryError;
use crate::strategy::RecoveryStrategy;

pub const HARDWARE_PRIORITY: i32 = 90;

/// Hardware and driver faults: reset the device, then reinitialize it.
pub struct HardwareStrategy {
    device: Arc<dyn DeviceControl>,
}

impl HardwareStrategy {
    pub fn new(device: Arc<dyn DeviceControl>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl RecoveryStrategy for HardwareStrategy {
    fn name(&self) -> &str {
        "Hardware"
    }

    fn can_handle(&self, failure: &Failure) -> bool {
        matches!(failure.kind, FailureType::Hardware | FailureType::Driver)
    }

    async fn recover(&self, failure: &Failure) -> Result<(), RecoveryError> {
        self.device.reset_device(&failure.device).await?;
        self.device.reinitialize_device(&failure.device).await?;

        info!(device = %failure.device, "device reset and reinitialized");
        Ok(())
    }

    fn priority(&self) -> i32 {
        HARDWARE_PRIORITY
    }
}
