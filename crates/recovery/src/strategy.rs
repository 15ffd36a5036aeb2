use accel_core::Failure;
use async_trait::async_trait;

use crate::error::RecoveryError;

/// One way of recovering from a class of failures.
///
/// The manager picks the highest-priority strategy whose `can_handle`
/// accepts the failure. A strategy either completes every step or returns the
/// first error; it never reports partial success.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Name recorded on every attempt made with this strategy.
    fn name(&self) -> &str;

    fn can_handle(&self, failure: &Failure) -> bool;

    async fn recover(&self, failure: &Failure) -> Result<(), RecoveryError>;

    /// Higher runs first.
    fn priority(&self) -> i32;
}
