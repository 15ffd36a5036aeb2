pub mod error;
pub mod manager;
pub mod stats;

pub use error::ResourceError;
pub use manager::{CachePayload, ResourceManager};
pub use stats::ResourceStats;
