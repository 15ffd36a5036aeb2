//! Scheduler runner, split by concern:
//! - `core`: Scheduler struct, guarded control state, accessors and idle waiting
//! - `admission`: submission and the admission loop
//! - `execution`: deadline-bound handler execution, completion and failure reporting

mod admission;
mod core;
mod execution;

pub use self::core::Scheduler;
