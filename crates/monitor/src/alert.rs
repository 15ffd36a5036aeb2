use std::fmt;

use accel_core::{MetricsSnapshot, MonitorConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    Temperature,
    MemoryUsage,
    Utilization,
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertMetric::Temperature => f.write_str("temperature"),
            AlertMetric::MemoryUsage => f.write_str("memory_usage"),
            AlertMetric::Utilization => f.write_str("utilization"),
        }
    }
}

/// A reading above its configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdAlert {
    pub metric: AlertMetric,
    pub value: f64,
    pub threshold: f64,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Every threshold `snapshot` exceeds. Alerts are level-triggered: a reading
/// that stays high alerts on every poll.
pub fn evaluate(snapshot: &MetricsSnapshot, config: &MonitorConfig) -> Vec<ThresholdAlert> {
    [
        (AlertMetric::Temperature, snapshot.temperature_c, config.temperature_threshold_c),
        (AlertMetric::MemoryUsage, snapshot.memory_usage, config.memory_usage_threshold),
        (AlertMetric::Utilization, snapshot.utilization, config.utilization_threshold),
    ]
    .into_iter()
    .filter(|&(_, value, threshold)| value > threshold)
    .map(|(metric, value, threshold)| ThresholdAlert {
        metric,
        value,
        threshold,
        device_id: snapshot.device_id.clone(),
        timestamp: snapshot.timestamp,
    })
    .collect()
}
