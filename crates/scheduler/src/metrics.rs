use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::types::Priority;

/// Scheduler counters. Observational only; nothing reads them to decide.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Tasks waiting for admission.
    pub queue_length: usize,
    /// Tasks currently executing.
    pub running: usize,
    pub submitted: u64,
    pub admitted: u64,
    pub completed: u64,
    /// All failures, including deadline expiry and admission rejection.
    pub failed: u64,
    pub deadline_exceeded: u64,
    /// Handlers that ran to a terminal state. Tasks rejected from the queue
    /// never ran and are not counted.
    pub finished_runs: u64,
    /// Mean time from submission to admission.
    pub avg_wait: Duration,
    /// Mean handler run time for tasks that reached a terminal state.
    pub avg_run_time: Duration,
    pub admitted_by_priority: HashMap<Priority, u64>,
}

impl SchedulerMetrics {
    pub fn record_admission(&mut self, priority: Priority, wait: Duration) {
        self.admitted += 1;
        *self.admitted_by_priority.entry(priority).or_default() += 1;
        self.avg_wait = incremental_mean(self.avg_wait, wait, self.admitted);
    }

    pub fn record_finish(&mut self, succeeded: bool, deadline_exceeded: bool, run_time: Duration) {
        if succeeded {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        if deadline_exceeded {
            self.deadline_exceeded += 1;
        }
        self.finished_runs += 1;
        self.avg_run_time = incremental_mean(self.avg_run_time, run_time, self.finished_runs);
    }

    /// A task failed from the queue without running.
    pub fn record_rejection(&mut self, deadline_exceeded: bool) {
        self.failed += 1;
        if deadline_exceeded {
            self.deadline_exceeded += 1;
        }
    }
}

// new_avg = prev_avg + (sample - prev_avg) / count
fn incremental_mean(prev: Duration, sample: Duration, count: u64) -> Duration {
    if count <= 1 {
        return sample;
    }
    let prev_nanos = prev.as_nanos() as f64;
    let cur_nanos = sample.as_nanos() as f64;
    let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
    Duration::from_nanos(avg_nanos as u64)
}
