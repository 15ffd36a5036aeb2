use std::sync::Arc;

use accel_core::AdmissionPolicy;
use accel_resource::ResourceError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SchedulerError;
use crate::events::TaskEvent;
use crate::queue::QueuedTask;
use crate::task::{Task, TaskContext, TaskError};
use crate::types::TaskStatus;

use super::core::{ControlState, RunningTask};
use super::Scheduler;

impl Scheduler {
    /// Queue `task` and try to admit pending work.
    ///
    /// Fails for invalid input, or when this task is rejected as
    /// unsatisfiable during the admission pass it triggers. Other queued
    /// tasks rejected in the same pass are logged and marked failed.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<(), SchedulerError> {
        if task.request.max_duration.is_zero() {
            return Err(SchedulerError::InvalidTask {
                id: task.id,
                reason: "max_duration must be greater than zero".into(),
            });
        }

        let mut state = self.control.lock().await;
        if state.statuses.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }

        let now = Instant::now();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.statuses.insert(task.id.clone(), TaskStatus::Pending);

        debug!(task_id = %task.id, priority = %task.priority, seq, "task queued");
        self.emit(TaskEvent::new(&task.id, task.priority, TaskStatus::Pending));
        self.update_metrics(|m| m.submitted += 1);

        let id = task.id.clone();
        state.queue.push(QueuedTask {
            seq,
            submitted_at: now,
            deadline: now + task.request.max_duration,
            task,
        });

        let rejected = self.admit_pending(&mut state).await;
        drop(state);
        self.idle.notify_waiters();

        match rejected.into_iter().find(|e| e.task_id() == id) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Admission loop: runs with the control lock held.
    ///
    /// Pops tasks in queue order while a running slot is free. A task that
    /// does not fit blocks everything behind it under `HeadOfLine`; under
    /// `SkipAndContinue` it is set aside and re-queued after the pass.
    /// Returns the tasks rejected as unsatisfiable, already marked failed.
    pub(super) async fn admit_pending(
        self: &Arc<Self>,
        state: &mut ControlState,
    ) -> Vec<SchedulerError> {
        let mut deferred = Vec::new();
        let mut rejected = Vec::new();

        while state.running.len() < self.config.max_concurrent {
            let Some(queued) = state.queue.pop() else {
                break;
            };

            let now = Instant::now();
            if now >= queued.deadline {
                let err = TaskError::DeadlineExceeded(queued.task.request.max_duration);
                warn!(task_id = %queued.task.id, "deadline passed while queued");
                self.reject(state, queued, err, true);
                continue;
            }

            match self.resources.allocate(&queued.task.request).await {
                Ok(()) => self.start(state, queued, now),
                Err(ResourceError::InsufficientResources { resource, requested, free })
                    if requested <= self.resources.limits().available(resource) =>
                {
                    debug!(task_id = %queued.task.id, %resource, requested, free, "task does not fit yet");
                    match self.config.admission_policy {
                        AdmissionPolicy::HeadOfLine => {
                            state.queue.push(queued);
                            break;
                        }
                        AdmissionPolicy::SkipAndContinue => deferred.push(queued),
                    }
                }
                Err(e) => {
                    warn!(task_id = %queued.task.id, error = %e, "task can never be admitted");
                    let id = queued.task.id.clone();
                    self.reject(state, queued, TaskError::Other(e.to_string()), false);
                    rejected.push(SchedulerError::Resource { id, source: e });
                }
            }
        }

        for queued in deferred {
            state.queue.push(queued);
        }
        self.publish_depths(state);

        rejected
    }

    /// Pending -> Running: record the slot and spawn the handler.
    fn start(self: &Arc<Self>, state: &mut ControlState, queued: QueuedTask, now: Instant) {
        let QueuedTask { submitted_at, deadline, task, .. } = queued;
        let wait = now.duration_since(submitted_at);

        state.statuses.insert(task.id.clone(), TaskStatus::Running);
        state.running.insert(
            task.id.clone(),
            RunningTask {
                priority: task.priority,
                request: task.request.clone(),
                started_at: now,
            },
        );

        info!(task_id = %task.id, priority = %task.priority, ?wait, "task admitted");
        self.update_metrics(|m| m.record_admission(task.priority, wait));
        self.emit(TaskEvent::new(&task.id, task.priority, TaskStatus::Running));

        let ctx = TaskContext {
            task_id: task.id,
            priority: task.priority,
            request: task.request,
            deadline,
        };
        tokio::spawn(Arc::clone(self).run_task(ctx, task.handler));
    }

    /// Pending -> Failed without ever holding resources.
    fn reject(&self, state: &mut ControlState, queued: QueuedTask, err: TaskError, expired: bool) {
        let task = queued.task;
        state.set_terminal(&task.id, TaskStatus::Failed, self.config.status_history);
        self.update_metrics(|m| m.record_rejection(expired));
        self.emit(TaskEvent::new(&task.id, task.priority, TaskStatus::Failed).with_error(err));
    }
}
