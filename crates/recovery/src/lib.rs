//! Typed-failure dispatch to prioritized recovery strategies.

pub mod error;
pub mod fallback;
pub mod manager;
pub mod strategies;
pub mod strategy;

pub use error::RecoveryError;
pub use fallback::{HostFallback, NoopFallback};
pub use manager::{RecoveryAttempt, RecoveryManager};
pub use strategies::{HardwareStrategy, OomStrategy};
pub use strategy::RecoveryStrategy;
