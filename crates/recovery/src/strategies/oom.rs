use std::sync::Arc;

use accel_core::{Failure, FailureType, TuningKnob};
use accel_resource::ResourceManager;
use async_trait::async_trait;
use tracing::info;

use crate::error::RecoveryError;
use crate::strategy::RecoveryStrategy;

pub const OOM_PRIORITY: i32 = 100;

/// Out-of-memory recovery: clear the cache, shrink the knob, compress memory.
pub struct OomStrategy {
    resources: Arc<ResourceManager>,
    knob: Arc<dyn TuningKnob>,
    reduction: f64,
}

impl OomStrategy {
    pub fn new(resources: Arc<ResourceManager>, knob: Arc<dyn TuningKnob>, reduction: f64) -> Self {
        Self {
            resources,
            knob,
            reduction,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for OomStrategy {
    fn name(&self) -> &str {
        "OOM"
    }

    fn can_handle(&self, failure: &Failure) -> bool {
        failure.kind == FailureType::Oom
    }

    async fn recover(&self, failure: &Failure) -> Result<(), RecoveryError> {
        let freed = self.resources.clear_cache();
        self.knob.reduce_knob(self.reduction)?;
        self.resources.compress_memory().await?;

        info!(device = %failure.device, freed, knob = self.knob.name(), "OOM recovery steps completed");
        Ok(())
    }

    fn priority(&self) -> i32 {
        OOM_PRIORITY
    }
}
