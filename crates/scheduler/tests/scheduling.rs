use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use accel_cache::CacheManager;
use accel_core::{
    AdmissionPolicy, RecoveryConfig, ResourceConfig, ResourceLimits, ResourceRequest,
    ResourceType, SchedulerConfig, SimulatedDevice, TuningError, TuningKnob,
};
use accel_recovery::RecoveryManager;
use accel_resource::ResourceManager;
use accel_scheduler::{Priority, Scheduler, Task, TaskError, TaskStatus};
use tokio::sync::oneshot;

struct NullKnob;

impl TuningKnob for NullKnob {
    fn name(&self) -> &str {
        "null"
    }

    fn reduce_knob(&self, _fraction: f64) -> Result<(), TuningError> {
        Ok(())
    }
}

fn resources(memory: u64) -> Arc<ResourceManager> {
    let limits = ResourceLimits {
        max_memory_bytes: memory,
        max_compute_units: 0,
        max_bandwidth_mbps: 0,
        reservation_fraction: 0.0,
    };
    Arc::new(ResourceManager::new(
        limits,
        Arc::new(CacheManager::new(memory / 2)),
        Arc::new(SimulatedDevice::new("gpu0")),
        ResourceConfig::default(),
    ))
}

fn config(max_concurrent: usize, policy: AdmissionPolicy) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent,
        admission_policy: policy,
        ..SchedulerConfig::default()
    }
}

fn mem(bytes: u64) -> ResourceRequest {
    ResourceRequest::memory(bytes, Duration::from_secs(10))
}

async fn idle(s: &Scheduler) {
    tokio::time::timeout(Duration::from_secs(5), s.wait_idle())
        .await
        .expect("scheduler did not go idle");
}

/// A task that holds its slot until the returned sender fires.
fn blocker(id: &str, bytes: u64) -> (Task, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let task = Task::new(Priority::Critical, mem(bytes), |_| async move {
        let _ = rx.await;
        Ok(())
    })
    .with_id(id);
    (task, tx)
}

fn recording(id: &str, priority: Priority, request: ResourceRequest, log: &Arc<Mutex<Vec<String>>>) -> Task {
    let log = Arc::clone(log);
    let name = id.to_string();
    Task::new(priority, request, move |_| async move {
        log.lock().unwrap().push(name);
        Ok(())
    })
    .with_id(id)
}

#[tokio::test]
async fn admits_in_strictly_decreasing_priority() {
    let s = Arc::new(Scheduler::new(config(1, AdmissionPolicy::HeadOfLine), resources(1_000)));
    let log = Arc::new(Mutex::new(Vec::new()));

    let (block, release) = blocker("blocker", 1);
    s.submit(block).await.unwrap();

    for (id, priority) in [
        ("low", Priority::Low),
        ("critical", Priority::Critical),
        ("normal", Priority::Normal),
        ("high", Priority::High),
    ] {
        s.submit(recording(id, priority, mem(10), &log)).await.unwrap();
    }
    assert_eq!(s.metrics().queue_length, 4);

    release.send(()).unwrap();
    idle(&s).await;

    assert_eq!(*log.lock().unwrap(), vec!["critical", "high", "normal", "low"]);
}

#[tokio::test]
async fn equal_priority_runs_earliest_deadline_then_fifo() {
    let s = Arc::new(Scheduler::new(config(1, AdmissionPolicy::HeadOfLine), resources(1_000)));
    let log = Arc::new(Mutex::new(Vec::new()));

    let (block, release) = blocker("blocker", 1);
    s.submit(block).await.unwrap();

    let long = || ResourceRequest::memory(1, Duration::from_secs(60));
    let short = || ResourceRequest::memory(1, Duration::from_secs(5));
    s.submit(recording("long-1", Priority::Normal, long(), &log)).await.unwrap();
    s.submit(recording("short", Priority::Normal, short(), &log)).await.unwrap();
    s.submit(recording("long-2", Priority::Normal, long(), &log)).await.unwrap();

    release.send(()).unwrap();
    idle(&s).await;

    assert_eq!(*log.lock().unwrap(), vec!["short", "long-1", "long-2"]);
}

#[tokio::test]
async fn deadline_forces_failure_and_releases_once() {
    let rm = resources(100);
    rm.allocate(&mem(30)).await.unwrap();
    let s = Arc::new(Scheduler::new(config(4, AdmissionPolicy::HeadOfLine), rm.clone()));
    let mut events = s.subscribe();

    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let task = Task::new(
        Priority::Normal,
        ResourceRequest::memory(10, Duration::from_millis(10)),
        move |_| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        },
    )
    .with_id("slow");

    let started = tokio::time::Instant::now();
    s.submit(task).await.unwrap();
    assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 40);

    idle(&s).await;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(s.status("slow").await, Some(TaskStatus::Failed));
    assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 30);
    assert_eq!(s.metrics().deadline_exceeded, 1);

    // The handler was aborted, not left running in the background.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(!finished.load(Ordering::SeqCst));
    assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 30);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.task_id, "slow");
        statuses.push(event.status);
        if event.status == TaskStatus::Failed {
            assert!(event.error.unwrap().contains("deadline"));
        }
    }
    assert_eq!(statuses, vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Failed]);
}

#[tokio::test]
async fn head_of_line_blocks_smaller_tasks_behind_starved_head() {
    let s = Arc::new(Scheduler::new(config(4, AdmissionPolicy::HeadOfLine), resources(100)));

    let (block, release) = blocker("big", 80);
    s.submit(block).await.unwrap();

    s.submit(Task::new(Priority::High, mem(50), |_| async { Ok(()) }).with_id("starved"))
        .await
        .unwrap();
    s.submit(Task::new(Priority::Low, mem(10), |_| async { Ok(()) }).with_id("small"))
        .await
        .unwrap();

    assert_eq!(s.status("starved").await, Some(TaskStatus::Pending));
    assert_eq!(s.status("small").await, Some(TaskStatus::Pending));

    release.send(()).unwrap();
    idle(&s).await;
    assert_eq!(s.status("starved").await, Some(TaskStatus::Completed));
    assert_eq!(s.status("small").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn skip_and_continue_admits_around_starved_head() {
    let s = Arc::new(Scheduler::new(config(4, AdmissionPolicy::SkipAndContinue), resources(100)));

    let (block, release) = blocker("big", 80);
    s.submit(block).await.unwrap();

    s.submit(Task::new(Priority::High, mem(50), |_| async { Ok(()) }).with_id("starved"))
        .await
        .unwrap();
    s.submit(Task::new(Priority::Low, mem(10), |_| async { Ok(()) }).with_id("small"))
        .await
        .unwrap();

    // "small" jumped the starved head; "starved" still waits.
    tokio::time::timeout(Duration::from_secs(1), async {
        while s.status("small").await != Some(TaskStatus::Completed) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(s.status("starved").await, Some(TaskStatus::Pending));

    release.send(()).unwrap();
    idle(&s).await;
    assert_eq!(s.status("starved").await, Some(TaskStatus::Completed));
}

#[tokio::test]
async fn classified_failures_reach_recovery() {
    let device = Arc::new(SimulatedDevice::new("gpu0"));
    let rm = Arc::new(ResourceManager::new(
        ResourceLimits {
            max_memory_bytes: 1_000,
            max_compute_units: 0,
            max_bandwidth_mbps: 0,
            reservation_fraction: 0.0,
        },
        Arc::new(CacheManager::new(500)),
        device.clone(),
        ResourceConfig::default(),
    ));
    let recovery = Arc::new(RecoveryManager::with_builtin_strategies(
        RecoveryConfig::default(),
        rm.clone(),
        Arc::new(NullKnob),
        device.clone(),
    ));
    let s = Arc::new(
        Scheduler::new(config(2, AdmissionPolicy::HeadOfLine), rm.clone()).with_recovery(recovery.clone()),
    );

    s.submit(
        Task::new(Priority::High, mem(100), |_| async {
            Err(TaskError::OutOfMemory("cudaMalloc failed".into()))
        })
        .with_id("oom-task"),
    )
    .await
    .unwrap();
    s.submit(
        Task::new(Priority::Normal, mem(100), |_| async {
            Err(TaskError::Other("bad input".into()))
        })
        .with_id("plain-failure"),
    )
    .await
    .unwrap();
    idle(&s).await;

    let history = recovery.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].strategy, "OOM");
    assert!(history[0].success);
    assert_eq!(history[0].failure.context["task_id"], "oom-task");
    assert_eq!(history[0].failure.device, "gpu0");
    assert_eq!(device.compress_count(), 1);
    assert_eq!(rm.stats(ResourceType::Memory).unwrap().used, 0);
}
