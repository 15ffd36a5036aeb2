use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use accel_cache::{CacheManager, CacheStats};
use accel_core::{AccelConfig, ResourceLimits, ResourceRequest, ResourceType, SimulatedDevice};
use accel_monitor::{spawn_pressure_feedback, BatchSizeKnob, PerformanceMonitor};
use accel_recovery::{RecoveryAttempt, RecoveryManager};
use accel_resource::{CachePayload, ResourceManager, ResourceStats};
use accel_scheduler::{Priority, Scheduler, SchedulerMetrics, Task, TaskError};
use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::cli::RunArgs;

const MIB: u64 = 1024 * 1024;

/// Everything printed after a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub scheduler: SchedulerMetrics,
    pub resources: BTreeMap<ResourceType, ResourceStats>,
    pub cache: CacheStats,
    pub batch_size: u32,
    pub recovery: Vec<RecoveryAttempt>,
}

/// Task `index` of the synthetic workload. Deterministic in `index`.
fn synthetic_task(index: usize, args: &RunArgs) -> Task {
    let priority = Priority::ALL[index % Priority::ALL.len()];
    let memory = (index as u64 % 8 + 1) * 256 * MIB;
    let units = (index as u32 % 4 + 1) * 64;
    let work = Duration::from_millis(args.task_ms);
    let request = ResourceRequest::new(memory, units, work * 10 + Duration::from_secs(1));

    let inject_oom = args.oom_every.is_some_and(|k| k > 0 && (index + 1) % k == 0);

    Task::new(priority, request, move |ctx| async move {
        tokio::time::sleep(work.min(ctx.remaining())).await;
        if inject_oom {
            return Err(TaskError::OutOfMemory(format!(
                "simulated allocation failure in {}",
                ctx.task_id
            )));
        }
        Ok(())
    })
    .with_id(format!("task-{:04}", index))
}

/// Wire the subsystem onto a simulated device, run the workload to
/// completion and collect the report.
pub async fn run(config: &AccelConfig, args: &RunArgs) -> Result<RunReport> {
    let device = Arc::new(SimulatedDevice::new(config.device.id.clone()));
    let knob = Arc::new(BatchSizeKnob::from_config(&config.tuning));
    let cache: Arc<CacheManager<CachePayload>> =
        Arc::new(CacheManager::new(config.cache.capacity_bytes));

    let resources = Arc::new(
        ResourceManager::new(
            ResourceLimits::from(&config.device),
            cache.clone(),
            device.clone(),
            config.resources.clone(),
        )
        .with_tuning_knob(knob.clone()),
    );
    let recovery = Arc::new(RecoveryManager::with_builtin_strategies(
        config.recovery.clone(),
        resources.clone(),
        knob.clone(),
        device.clone(),
    ));
    let scheduler = Arc::new(
        Scheduler::new(config.scheduler.clone(), resources.clone()).with_recovery(recovery.clone()),
    );

    // One notifier per loop so `notify_one` leaves a permit even when the
    // loop is mid-tick.
    let gc_shutdown = Arc::new(Notify::new());
    let monitor_shutdown = Arc::new(Notify::new());
    let monitor = Arc::new(PerformanceMonitor::new(device.clone(), config.monitor.clone()));
    let feedback = spawn_pressure_feedback(
        monitor.subscribe(),
        knob.clone(),
        config.resources.pressure_knob_reduction,
    );
    let background = [
        resources.spawn_periodic_gc(gc_shutdown.clone()),
        monitor.spawn(config.monitor.interval(), monitor_shutdown.clone()),
    ];

    // Warm the cache so OOM recovery has something to clear.
    for i in 0..4 {
        let payload: CachePayload = Arc::new(vec![0u8; 16]);
        resources.cache_add(format!("weights-{}", i), payload, 128 * MIB);
    }

    info!(tasks = args.tasks, oom_every = ?args.oom_every, "submitting synthetic workload");
    for index in 0..args.tasks {
        if let Err(e) = scheduler.submit(synthetic_task(index, args)).await {
            warn!(error = %e, "task rejected");
        }
    }

    tokio::time::timeout(Duration::from_secs(args.timeout_secs), scheduler.wait_idle())
        .await
        .context("workload did not drain before the timeout")?;

    gc_shutdown.notify_one();
    monitor_shutdown.notify_one();
    for handle in background {
        handle.await.context("background loop panicked")?;
    }
    drop(monitor);
    feedback.await.context("pressure feedback panicked")?;

    Ok(RunReport {
        scheduler: scheduler.metrics(),
        resources: resources.snapshot(),
        cache: cache.stats(),
        batch_size: knob.current(),
        recovery: recovery.history(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(oom_every: Option<usize>) -> RunArgs {
        RunArgs {
            tasks: 12,
            oom_every,
            task_ms: 5,
            timeout_secs: 30,
        }
    }

    #[test]
    fn workload_is_deterministic() {
        let a = synthetic_task(5, &args(None));
        let b = synthetic_task(5, &args(None));
        assert_eq!(a.id, b.id);
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.request, b.request);
        assert_eq!(synthetic_task(0, &args(None)).priority, Priority::Critical);
        assert_eq!(synthetic_task(3, &args(None)).priority, Priority::Low);
    }

    #[tokio::test]
    async fn run_drains_and_recovers_injected_ooms() {
        let mut config = AccelConfig::default();
        config.monitor.interval_secs = 1;
        let report = run(&config, &args(Some(4))).await.unwrap();

        assert_eq!(report.scheduler.submitted, 12);
        assert_eq!(report.scheduler.completed, 9);
        assert_eq!(report.scheduler.failed, 3);
        assert_eq!(report.recovery.len(), 3);
        assert!(report.recovery.iter().all(|a| a.strategy == "OOM" && a.success));
        assert_eq!(report.resources[&ResourceType::Memory].used, 0);
        assert!(report.batch_size < config.tuning.batch_size);
    }
}
