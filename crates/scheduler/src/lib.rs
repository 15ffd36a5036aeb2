//! Priority-ordered task admission under a concurrency cap.
//!
//! Tasks wait in a priority queue until both a running slot and their
//! resource request are available. Each admitted task runs in its own tokio
//! task bounded by an absolute deadline; on completion its resources go back
//! to the [`ResourceManager`](accel_resource::ResourceManager) and the queue
//! is tried again.

pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod runner;
pub mod task;
pub mod types;

pub use error::SchedulerError;
pub use events::TaskEvent;
pub use metrics::SchedulerMetrics;
pub use runner::Scheduler;
pub use task::{Task, TaskContext, TaskError};
pub use types::{Priority, TaskStatus};
