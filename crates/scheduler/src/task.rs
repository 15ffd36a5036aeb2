use std::fmt;
use std::future::Future;
use std::time::Duration;

use accel_core::{FailureType, ResourceRequest};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;

use crate::types::Priority;

/// Error returned by a task handler, or imposed on it by the scheduler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("out of device memory: {0}")]
    OutOfMemory(String),

    #[error("device fault: {0}")]
    DeviceFault(String),

    #[error("compute error: {0}")]
    Compute(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Failure class for recovery. `None` for errors recovery does not act on.
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            TaskError::OutOfMemory(_) => Some(FailureType::Oom),
            TaskError::DeviceFault(_) => Some(FailureType::Hardware),
            TaskError::Compute(_) => Some(FailureType::Compute),
            TaskError::DeadlineExceeded(_) | TaskError::Panicked(_) | TaskError::Other(_) => None,
        }
    }
}

/// Handed to the handler when the task starts.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub priority: Priority,
    pub request: ResourceRequest,
    /// Absolute deadline; the handler is aborted when it passes.
    pub deadline: Instant,
}

impl TaskContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

pub(crate) type TaskHandler =
    Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// A unit of work submitted to the scheduler.
pub struct Task {
    pub id: String,
    pub priority: Priority,
    pub request: ResourceRequest,
    pub(crate) handler: TaskHandler,
}

impl Task {
    /// New task with a random id.
    pub fn new<F, Fut>(priority: Priority, request: ResourceRequest, handler: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            priority,
            request,
            handler: Box::new(move |ctx| Box::pin(handler(ctx))),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(TaskError::OutOfMemory("x".into()).failure_type(), Some(FailureType::Oom));
        assert_eq!(TaskError::DeviceFault("x".into()).failure_type(), Some(FailureType::Hardware));
        assert_eq!(TaskError::Compute("x".into()).failure_type(), Some(FailureType::Compute));
        assert_eq!(TaskError::DeadlineExceeded(Duration::from_millis(5)).failure_type(), None);
        assert_eq!(TaskError::Panicked("boom".into()).failure_type(), None);
    }

    #[test]
    fn ids_are_unique_unless_overridden() {
        let req = ResourceRequest::memory(1, Duration::from_secs(1));
        let a = Task::new(Priority::Low, req.clone(), |_| async { Ok(()) });
        let b = Task::new(Priority::Low, req.clone(), |_| async { Ok(()) });
        assert_ne!(a.id, b.id);

        let c = Task::new(Priority::Low, req, |_| async { Ok(()) }).with_id("fixed");
        assert_eq!(c.id, "fixed");
        assert!(format!("{:?}", c).contains("fixed"));
    }
}
