use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Point-in-time device telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    /// Compute utilization ratio (0.0 - 1.0).
    pub utilization: f64,
    pub memory_used_bytes: u64,
    /// Memory usage ratio (0.0 - 1.0).
    pub memory_usage: f64,
    pub temperature_c: f64,
    pub power_watts: f64,
    pub latency: Duration,
    pub throughput: f64,
    pub batch_size: u32,
}

impl MetricsSnapshot {
    /// An idle reading for `device_id`.
    pub fn idle(device_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            device_id: device_id.into(),
            utilization: 0.0,
            memory_used_bytes: 0,
            memory_usage: 0.0,
            temperature_c: 35.0,
            power_watts: 0.0,
            latency: Duration::ZERO,
            throughput: 0.0,
            batch_size: 0,
        }
    }
}

/// Pull-based telemetry feed.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn latest_snapshot(&self) -> Result<MetricsSnapshot, MetricsError>;
}
