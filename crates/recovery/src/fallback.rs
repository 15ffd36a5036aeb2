use accel_core::Failure;
use async_trait::async_trait;
use tracing::warn;

use crate::error::RecoveryError;

/// Device-to-host escalation path taken once retries are exhausted.
///
/// Moving work onto the CPU is the device integration's job; the recovery
/// manager only decides when to ask for it.
#[async_trait]
pub trait HostFallback: Send + Sync {
    async fn fall_back(&self, failure: &Failure) -> Result<(), RecoveryError>;
}

/// Logs the escalation and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFallback;

#[async_trait]
impl HostFallback for NoopFallback {
    async fn fall_back(&self, failure: &Failure) -> Result<(), RecoveryError> {
        warn!(kind = %failure.kind, device = %failure.device, "host fallback requested, no fallback installed");
        Ok(())
    }
}
