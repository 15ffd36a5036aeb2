use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{Priority, TaskStatus};

/// Broadcast on every task status transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Rendered task error on `Failed`.
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: &str, priority: Priority, status: TaskStatus) -> Self {
        Self {
            task_id: task_id.to_string(),
            priority,
            status,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}
