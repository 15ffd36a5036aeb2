use std::sync::Arc;
use std::time::Duration;

use accel_core::{
    MetricsError, MetricsSnapshot, MetricsSource, MonitorConfig, SimulatedDevice, TuningKnob,
};
use accel_monitor::{spawn_pressure_feedback, AlertMetric, BatchSizeKnob, PerformanceMonitor};
use tokio::sync::Notify;

struct BrokenSource;

#[async_trait::async_trait]
impl MetricsSource for BrokenSource {
    async fn latest_snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        Err(MetricsError::Unavailable("nvml not loaded".into()))
    }
}

fn hot_snapshot() -> MetricsSnapshot {
    let mut snap = MetricsSnapshot::idle("gpu0");
    snap.memory_usage = 0.98;
    snap.temperature_c = 60.0;
    snap
}

#[tokio::test]
async fn history_is_bounded_and_latest_tracks_last_poll() {
    let device = Arc::new(SimulatedDevice::new("gpu0"));
    let monitor = PerformanceMonitor::new(
        device.clone(),
        MonitorConfig {
            history_limit: 3,
            ..MonitorConfig::default()
        },
    );
    assert!(monitor.latest().is_none());

    for i in 0..5 {
        let mut snap = MetricsSnapshot::idle("gpu0");
        snap.batch_size = i;
        device.set_snapshot(snap);
        monitor.poll_once().await.unwrap();
    }

    let batch_sizes: Vec<u32> = monitor.history().iter().map(|s| s.batch_size).collect();
    assert_eq!(batch_sizes, vec![2, 3, 4]);
    assert_eq!(monitor.latest().unwrap().batch_size, 4);
}

#[tokio::test]
async fn alerts_are_broadcast_to_every_subscriber() {
    let device = Arc::new(SimulatedDevice::new("gpu0"));
    device.set_snapshot(hot_snapshot());
    let monitor = PerformanceMonitor::new(device, MonitorConfig::default());
    let mut first = monitor.subscribe();
    let mut second = monitor.subscribe();

    monitor.poll_once().await.unwrap();

    let a = first.try_recv().unwrap();
    let b = second.try_recv().unwrap();
    assert_eq!(a.metric, AlertMetric::MemoryUsage);
    assert_eq!(a, b);
    assert!(first.try_recv().is_err());

    let json = serde_json::to_value(&a).unwrap();
    assert_eq!(json["metric"], "memory_usage");
}

#[tokio::test]
async fn source_errors_propagate_without_recording() {
    let monitor = PerformanceMonitor::new(Arc::new(BrokenSource), MonitorConfig::default());
    let err = monitor.poll_once().await.unwrap_err();
    assert!(matches!(err, MetricsError::Unavailable(_)));
    assert!(monitor.history().is_empty());
}

#[tokio::test]
async fn memory_alerts_shrink_the_knob() {
    let device = Arc::new(SimulatedDevice::new("gpu0"));
    device.set_snapshot(hot_snapshot());
    let monitor = PerformanceMonitor::new(device, MonitorConfig::default());
    let knob = Arc::new(BatchSizeKnob::new(256, 32, 512, 32, Duration::ZERO));

    let feedback = spawn_pressure_feedback(monitor.subscribe(), knob.clone(), 0.5);
    monitor.poll_once().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while knob.current() == 256 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(knob.current(), 128);
    assert_eq!(knob.name(), "batch_size");

    // Dropping the monitor closes the channel and ends the bridge.
    drop(monitor);
    tokio::time::timeout(Duration::from_secs(1), feedback)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn spawned_monitor_polls_on_interval() {
    let device = Arc::new(SimulatedDevice::new("gpu0"));
    let monitor = Arc::new(PerformanceMonitor::new(device, MonitorConfig::default()));
    let shutdown = Arc::new(Notify::new());

    let handle = monitor.spawn(Duration::from_secs(10), shutdown.clone());
    // First tick fires immediately, then every 10s.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(monitor.history().len(), 3);

    shutdown.notify_waiters();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
