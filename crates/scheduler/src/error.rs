use accel_resource::ResourceError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("invalid task {id}: {reason}")]
    InvalidTask { id: String, reason: String },

    #[error("task {0} already submitted")]
    DuplicateTask(String),

    #[error("task {id} cannot be admitted: {source}")]
    Resource {
        id: String,
        #[source]
        source: ResourceError,
    },
}

impl SchedulerError {
    /// Id of the task the error is about.
    pub fn task_id(&self) -> &str {
        match self {
            Self::InvalidTask { id, .. } | Self::Resource { id, .. } => id,
            Self::DuplicateTask(id) => id,
        }
    }
}
