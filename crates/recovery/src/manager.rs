use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use accel_core::{DeviceControl, Failure, FailureType, RecoveryConfig, TuningKnob};
use accel_resource::ResourceManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::RecoveryError;
use crate::fallback::{HostFallback, NoopFallback};
use crate::strategies::{HardwareStrategy, OomStrategy};
use crate::strategy::RecoveryStrategy;

/// Audit record of one recovery run. Never mutated once recorded.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub failure: Failure,
    pub strategy: String,
    pub success: bool,
    /// Rendered strategy error when `success` is false.
    pub error: Option<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    /// Retries for this failure class ran out on this attempt.
    pub escalated: bool,
}

#[derive(Default)]
struct RecoveryState {
    history: VecDeque<RecoveryAttempt>,
    consecutive_failures: HashMap<FailureType, u32>,
}

/// Dispatches failures to the highest-priority strategy that accepts them.
pub struct RecoveryManager {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    fallback: Arc<dyn HostFallback>,
    config: RecoveryConfig,
    state: Mutex<RecoveryState>,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            fallback: Arc::new(NoopFallback),
            config,
            state: Mutex::new(RecoveryState::default()),
        }
    }

    /// A manager with the OOM and hardware strategies registered.
    pub fn with_builtin_strategies(
        config: RecoveryConfig,
        resources: Arc<ResourceManager>,
        knob: Arc<dyn TuningKnob>,
        device: Arc<dyn DeviceControl>,
    ) -> Self {
        let reduction = config.oom_knob_reduction;
        let manager = Self::new(config);
        manager.register(Arc::new(OomStrategy::new(resources, knob, reduction)));
        manager.register(Arc::new(HardwareStrategy::new(device)));
        manager
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn HostFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Add a strategy. Equal priorities keep registration order.
    pub fn register(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut strategies = self.strategies.write().unwrap_or_else(PoisonError::into_inner);
        info!(strategy = strategy.name(), priority = strategy.priority(), "recovery strategy registered");
        strategies.push(strategy);
        strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn select(&self, failure: &Failure) -> Option<Arc<dyn RecoveryStrategy>> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.can_handle(failure))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, RecoveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the best applicable strategy for `failure` and record the attempt.
    ///
    /// Strategy failures come back as an attempt with `success == false`, not
    /// as an error. The only error is a failure no strategy accepts, which is
    /// not recorded.
    pub async fn report_failure(&self, failure: Failure) -> Result<RecoveryAttempt, RecoveryError> {
        let Some(strategy) = self.select(&failure) else {
            warn!(kind = %failure.kind, device = %failure.device, error = %failure.error, "unhandled failure");
            return Err(RecoveryError::Unhandled(failure.kind));
        };

        let timestamp = Utc::now();
        let started = Instant::now();
        let outcome = strategy.recover(&failure).await;
        let duration = started.elapsed();

        let mut attempt = RecoveryAttempt {
            strategy: strategy.name().to_string(),
            success: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            duration,
            timestamp,
            escalated: false,
            failure,
        };

        attempt.escalated = self.count_outcome(attempt.failure.kind, attempt.success);

        if attempt.success {
            info!(strategy = %attempt.strategy, kind = %attempt.failure.kind, ?duration, "recovery succeeded");
        } else {
            warn!(
                strategy = %attempt.strategy,
                kind = %attempt.failure.kind,
                error = attempt.error.as_deref().unwrap_or_default(),
                "recovery failed"
            );
        }

        if attempt.escalated {
            self.escalate(&attempt.failure).await;
        }

        let mut state = self.lock();
        state.history.push_back(attempt.clone());
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        Ok(attempt)
    }

    /// Update the consecutive-failure counter; true when retries ran out.
    fn count_outcome(&self, kind: FailureType, success: bool) -> bool {
        let mut state = self.lock();
        if success {
            state.consecutive_failures.remove(&kind);
            return false;
        }

        let count = state.consecutive_failures.entry(kind).or_insert(0);
        *count += 1;
        if *count >= self.config.max_retries {
            state.consecutive_failures.remove(&kind);
            true
        } else {
            false
        }
    }

    async fn escalate(&self, failure: &Failure) {
        if !self.config.fallback_enabled {
            warn!(kind = %failure.kind, retries = self.config.max_retries, "recovery retries exhausted, fallback disabled");
            return;
        }

        warn!(kind = %failure.kind, retries = self.config.max_retries, "recovery retries exhausted, falling back to host");
        if let Err(e) = self.fallback.fall_back(failure).await {
            warn!(error = %e, "host fallback failed");
        }
    }

    /// Consecutive failed recoveries for `kind` since the last success or escalation.
    pub fn retry_count(&self, kind: FailureType) -> u32 {
        self.lock().consecutive_failures.get(&kind).copied().unwrap_or(0)
    }

    /// Recorded attempts, oldest first.
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.lock().history.iter().cloned().collect()
    }
}
