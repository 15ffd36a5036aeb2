use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use accel_core::{ResourceRequest, SchedulerConfig};
use accel_recovery::RecoveryManager;
use accel_resource::ResourceManager;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::time::Instant;
use tracing::info;

use crate::events::TaskEvent;
use crate::metrics::SchedulerMetrics;
use crate::queue::PendingQueue;
use crate::types::{Priority, TaskStatus};

/// A task holding a running slot and its resources.
pub(super) struct RunningTask {
    pub priority: Priority,
    pub request: ResourceRequest,
    pub started_at: Instant,
}

/// Everything guarded by the scheduler lock.
#[derive(Default)]
pub(super) struct ControlState {
    pub queue: PendingQueue,
    pub running: HashMap<String, RunningTask>,
    pub statuses: HashMap<String, TaskStatus>,
    /// Terminal task ids, oldest first, for bounding `statuses`.
    pub finished: VecDeque<String>,
    pub next_seq: u64,
}

impl ControlState {
    pub fn set_terminal(&mut self, id: &str, status: TaskStatus, history: usize) {
        self.statuses.insert(id.to_string(), status);
        self.finished.push_back(id.to_string());
        while self.finished.len() > history {
            if let Some(old) = self.finished.pop_front() {
                self.statuses.remove(&old);
            }
        }
    }
}

/// Priority scheduler with resource-gated admission.
///
/// Lock order: the control lock is taken first and may be held across
/// [`ResourceManager::allocate`]; the resource manager never calls back into
/// the scheduler. Recovery is always called after the control lock is released.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) resources: Arc<ResourceManager>,
    pub(super) recovery: Option<Arc<RecoveryManager>>,
    pub(super) control: Mutex<ControlState>,
    pub(super) metrics: StdMutex<SchedulerMetrics>,
    pub(super) events: broadcast::Sender<TaskEvent>,
    /// Failure reports handed to recovery but not finished yet.
    pub(super) reports_in_flight: AtomicUsize,
    pub(super) idle: Notify,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, resources: Arc<ResourceManager>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            resources,
            recovery: None,
            control: Mutex::new(ControlState::default()),
            metrics: StdMutex::new(SchedulerMetrics::default()),
            events,
            reports_in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    /// Report classified handler failures to `recovery`.
    pub fn with_recovery(mut self, recovery: Arc<RecoveryManager>) -> Self {
        info!(strategies = ?recovery.strategy_names(), "recovery attached to scheduler");
        self.recovery = Some(recovery);
        self
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current status, or `None` for unknown ids and statuses aged out of history.
    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.control.lock().await.statuses.get(id).copied()
    }

    /// Receive every status transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Resolve once nothing is queued, running, or being reported to recovery.
    ///
    /// A head-of-line blocked queue with nothing running never drains; bound
    /// the wait with a timeout in that case.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle().await {
                return;
            }
            notified.await;
        }
    }

    async fn is_idle(&self) -> bool {
        let state = self.control.lock().await;
        state.queue.is_empty()
            && state.running.is_empty()
            && self.reports_in_flight.load(Ordering::SeqCst) == 0
    }

    pub(super) fn emit(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(super) fn update_metrics(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        f(&mut self.metrics.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub(super) fn publish_depths(&self, state: &ControlState) {
        self.update_metrics(|m| {
            m.queue_length = state.queue.len();
            m.running = state.running.len();
        });
    }
}
