use std::sync::atomic::Ordering;
use std::sync::Arc;

use accel_core::Failure;
use futures::future::BoxFuture;
use tracing::{error, info, warn};

use crate::events::TaskEvent;
use crate::task::{TaskContext, TaskError, TaskHandler};
use crate::types::TaskStatus;

use super::Scheduler;

impl Scheduler {
    /// Drive one admitted task to a terminal state.
    ///
    /// The handler gets its own tokio task so a deadline can abort it
    /// outright. Boxed because completion re-enters the admission loop, which
    /// spawns further `run_task` futures.
    pub(super) fn run_task(self: Arc<Self>, ctx: TaskContext, handler: TaskHandler) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let task_id = ctx.task_id.clone();
            let deadline = ctx.deadline;
            let max_duration = ctx.request.max_duration;

            // Calling the handler inside the spawned task turns a panic in the
            // closure body into a JoinError as well.
            let mut handle = tokio::spawn(async move { handler(ctx).await });
            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    error!(task_id = %task_id, error = %join_err, "task handler panicked");
                    Err(TaskError::Panicked(join_err.to_string()))
                }
                Err(_) => {
                    handle.abort();
                    warn!(task_id = %task_id, ?max_duration, "task deadline exceeded, aborting");
                    Err(TaskError::DeadlineExceeded(max_duration))
                }
            };

            self.complete(&task_id, outcome).await;
            self.idle.notify_waiters();
        })
    }

    /// Running -> terminal. Safe to call more than once per task: only the
    /// first call finds it in the running set and releases its resources.
    pub(super) async fn complete(self: &Arc<Self>, task_id: &str, outcome: Result<(), TaskError>) {
        let failure = {
            let mut state = self.control.lock().await;
            let Some(running) = state.running.remove(task_id) else {
                return;
            };

            self.resources.release(&running.request);
            let run_time = running.started_at.elapsed();
            let status = if outcome.is_ok() {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            state.set_terminal(task_id, status, self.config.status_history);

            let deadline_exceeded = matches!(outcome, Err(TaskError::DeadlineExceeded(_)));
            self.update_metrics(|m| m.record_finish(outcome.is_ok(), deadline_exceeded, run_time));

            let mut event = TaskEvent::new(task_id, running.priority, status);
            match &outcome {
                Ok(()) => info!(task_id = %task_id, ?run_time, "task completed"),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "task failed");
                    event = event.with_error(e);
                }
            }
            self.emit(event);

            // Rejections are logged and recorded by the admission pass.
            self.admit_pending(&mut state).await;

            let failure = outcome.err().and_then(|e| self.classify(task_id, &e));
            if failure.is_some() {
                self.reports_in_flight.fetch_add(1, Ordering::SeqCst);
            }
            failure
        };

        if let Some(failure) = failure {
            self.report(failure).await;
            self.reports_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn classify(&self, task_id: &str, err: &TaskError) -> Option<Failure> {
        if self.recovery.is_none() {
            return None;
        }
        let kind = err.failure_type()?;
        let device = self.resources.device().device_id().to_string();
        Some(Failure::new(kind, device, err).with_context("task_id", task_id))
    }

    async fn report(&self, failure: Failure) {
        let Some(recovery) = &self.recovery else {
            return;
        };
        let task_id = failure.context.get("task_id").cloned();
        match recovery.report_failure(failure).await {
            Ok(attempt) => info!(
                task_id = ?task_id,
                strategy = %attempt.strategy,
                success = attempt.success,
                "task failure handed to recovery"
            ),
            Err(e) => warn!(task_id = ?task_id, error = %e, "task failure not recovered"),
        }
    }
}
