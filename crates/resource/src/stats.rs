use chrono::{DateTime, Utc};
use serde::Serialize;

/// Accounting for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStats {
    /// Currently allocated to tasks.
    pub used: u64,
    /// Held back from allocation by the reservation fraction.
    pub reserved: u64,
    /// Allocatable ceiling (limit minus reservation).
    pub available: u64,
    /// Highest `used` ever observed.
    pub peak: u64,
    /// Bytes resident in the cache. Always zero for non-memory types.
    pub cached: u64,
    pub last_reclaim: Option<DateTime<Utc>>,
    pub reclaim_count: u64,
}

impl ResourceStats {
    /// Headroom left for new allocations once cache residency is counted.
    pub fn free(&self) -> u64 {
        self.available.saturating_sub(self.used + self.cached)
    }
}
