//! Bounded, byte-accounted LRU cache used as a memory-pressure relief valve.

pub mod manager;

pub use manager::{CacheManager, CacheStats};
