use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;

/// Kinds of device capacity tracked by the resource manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum ResourceType {
    /// Device memory in bytes.
    Memory,
    /// Compute units (threads / cores).
    Compute,
    /// Memory bandwidth in MB/s.
    Bandwidth,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Memory,
        ResourceType::Compute,
        ResourceType::Bandwidth,
    ];
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Memory => f.write_str("memory"),
            ResourceType::Compute => f.write_str("compute"),
            ResourceType::Bandwidth => f.write_str("bandwidth"),
        }
    }
}

/// What a task asks of the device. Immutable once the task is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub memory_bytes: u64,
    pub compute_units: u32,
    #[serde(default)]
    pub bandwidth_mbps: u64,
    /// Upper bound on execution time; the task deadline derives from it.
    pub max_duration: Duration,
}

impl ResourceRequest {
    pub fn new(memory_bytes: u64, compute_units: u32, max_duration: Duration) -> Self {
        Self {
            memory_bytes,
            compute_units,
            bandwidth_mbps: 0,
            max_duration,
        }
    }

    /// Memory-only request.
    pub fn memory(memory_bytes: u64, max_duration: Duration) -> Self {
        Self::new(memory_bytes, 0, max_duration)
    }

    pub fn with_compute_units(mut self, units: u32) -> Self {
        self.compute_units = units;
        self
    }

    pub fn with_bandwidth_mbps(mut self, mbps: u64) -> Self {
        self.bandwidth_mbps = mbps;
        self
    }

    pub fn amount(&self, resource: ResourceType) -> u64 {
        match resource {
            ResourceType::Memory => self.memory_bytes,
            ResourceType::Compute => self.compute_units as u64,
            ResourceType::Bandwidth => self.bandwidth_mbps,
        }
    }

    /// The (type, amount) pairs this request touches. Zero amounts are skipped.
    pub fn demands(&self) -> Vec<(ResourceType, u64)> {
        ResourceType::ALL
            .iter()
            .map(|&ty| (ty, self.amount(ty)))
            .filter(|&(_, amount)| amount > 0)
            .collect()
    }
}

/// Fixed device capacity plus the fraction held back from allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_compute_units: u64,
    pub max_bandwidth_mbps: u64,
    /// Share of every limit that is never handed out (0.0 - 1.0).
    pub reservation_fraction: f64,
}

impl ResourceLimits {
    pub fn limit(&self, resource: ResourceType) -> u64 {
        match resource {
            ResourceType::Memory => self.max_memory_bytes,
            ResourceType::Compute => self.max_compute_units,
            ResourceType::Bandwidth => self.max_bandwidth_mbps,
        }
    }

    /// Amount held back from allocation for `resource`.
    pub fn reserved(&self, resource: ResourceType) -> u64 {
        let limit = self.limit(resource);
        let reserved = (limit as f64 * self.reservation_fraction).round() as u64;
        reserved.min(limit)
    }

    /// Allocatable amount for `resource` (limit minus reservation).
    pub fn available(&self, resource: ResourceType) -> u64 {
        self.limit(resource) - self.reserved(resource)
    }

    /// Only resources with a non-zero limit are tracked.
    pub fn is_tracked(&self, resource: ResourceType) -> bool {
        self.limit(resource) > 0
    }
}

impl From<&DeviceConfig> for ResourceLimits {
    fn from(device: &DeviceConfig) -> Self {
        Self {
            max_memory_bytes: device.max_memory_bytes,
            max_compute_units: device.max_compute_units,
            max_bandwidth_mbps: device.max_bandwidth_mbps,
            reservation_fraction: device.reservation_fraction,
        }
    }
}
