use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use accel_core::{MetricsError, MetricsSnapshot, MetricsSource, MonitorConfig};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::{self, ThresholdAlert};

/// Polls a [`MetricsSource`], keeps recent snapshots and publishes threshold
/// alerts to subscribers.
pub struct PerformanceMonitor {
    source: Arc<dyn MetricsSource>,
    config: MonitorConfig,
    history: Mutex<VecDeque<MetricsSnapshot>>,
    alerts: broadcast::Sender<ThresholdAlert>,
}

impl PerformanceMonitor {
    pub fn new(source: Arc<dyn MetricsSource>, config: MonitorConfig) -> Self {
        let (alerts, _) = broadcast::channel(64);
        Self {
            source,
            config,
            history: Mutex::new(VecDeque::new()),
            alerts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MetricsSnapshot>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThresholdAlert> {
        self.alerts.subscribe()
    }

    /// Take one reading, record it and publish any alerts.
    pub async fn poll_once(&self) -> Result<MetricsSnapshot, MetricsError> {
        let snapshot = self.source.latest_snapshot().await?;

        {
            let mut history = self.lock();
            history.push_back(snapshot.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        for alert in alert::evaluate(&snapshot, &self.config) {
            warn!(
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                device = %alert.device_id,
                "threshold exceeded"
            );
            // No subscribers is fine.
            let _ = self.alerts.send(alert);
        }

        debug!(device = %snapshot.device_id, utilization = snapshot.utilization, "metrics polled");
        Ok(snapshot)
    }

    pub fn latest(&self) -> Option<MetricsSnapshot> {
        self.lock().back().cloned()
    }

    /// Recorded snapshots, oldest first.
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.lock().iter().cloned().collect()
    }

    /// Poll every `interval` until `shutdown` is notified.
    pub fn spawn(self: &Arc<Self>, interval: Duration, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            info!(interval_secs = interval.as_secs(), "performance monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.poll_once().await {
                            warn!(error = %e, "metrics poll failed");
                        }
                    }
                    _ = shutdown.notified() => {
                        info!("performance monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}
