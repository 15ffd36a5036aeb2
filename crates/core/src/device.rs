//! Device collaborator contract and an in-process simulated device.
//!
//! Real deployments implement [`DeviceControl`] on top of the vendor driver.
//! [`SimulatedDevice`] stands in for it in the CLI dry-run and in tests: it
//! counts every call and can be told to fail individual operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::metrics::{MetricsError, MetricsSnapshot, MetricsSource};

/// Device-specific failures, surfaced unchanged to recovery.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device {device} reset failed: {reason}")]
    ResetFailed { device: String, reason: String },

    #[error("device {device} reinitialization failed: {reason}")]
    ReinitFailed { device: String, reason: String },

    #[error("memory compression failed: {0}")]
    CompressFailed(String),

    #[error("device operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

/// Device-level operations the core relies on but does not implement.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    fn device_id(&self) -> &str;

    async fn reset_device(&self, device_id: &str) -> Result<(), DeviceError>;

    async fn reinitialize_device(&self, device_id: &str) -> Result<(), DeviceError>;

    /// Compact / defragment retained device memory.
    async fn compress_memory(&self) -> Result<(), DeviceError>;

    /// Rebalance compute scheduling on the device.
    async fn optimize_compute(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// In-process device with call counters and failure injection.
pub struct SimulatedDevice {
    id: String,
    latency: Duration,
    resets: AtomicU64,
    reinits: AtomicU64,
    compressions: AtomicU64,
    optimizations: AtomicU64,
    fail_reset: AtomicBool,
    fail_reinit: AtomicBool,
    fail_compress: AtomicBool,
    snapshot: Mutex<MetricsSnapshot>,
}

impl SimulatedDevice {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            snapshot: Mutex::new(MetricsSnapshot::idle(id.clone())),
            id,
            latency: Duration::ZERO,
            resets: AtomicU64::new(0),
            reinits: AtomicU64::new(0),
            compressions: AtomicU64::new(0),
            optimizations: AtomicU64::new(0),
            fail_reset: AtomicBool::new(false),
            fail_reinit: AtomicBool::new(false),
            fail_compress: AtomicBool::new(false),
        }
    }

    /// Add an artificial delay to every device operation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_reinit(&self, fail: bool) {
        self.fail_reinit.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_compress(&self, fail: bool) {
        self.fail_compress.store(fail, Ordering::Relaxed);
    }

    /// Replace the reading returned by [`MetricsSource::latest_snapshot`].
    pub fn set_snapshot(&self, snapshot: MetricsSnapshot) {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn reinit_count(&self) -> u64 {
        self.reinits.load(Ordering::Relaxed)
    }

    pub fn compress_count(&self) -> u64 {
        self.compressions.load(Ordering::Relaxed)
    }

    pub fn optimize_count(&self) -> u64 {
        self.optimizations.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl DeviceControl for SimulatedDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn reset_device(&self, device_id: &str) -> Result<(), DeviceError> {
        self.simulate_latency().await;
        self.resets.fetch_add(1, Ordering::Relaxed);
        if self.fail_reset.load(Ordering::Relaxed) {
            return Err(DeviceError::ResetFailed {
                device: device_id.to_string(),
                reason: "injected fault".into(),
            });
        }
        debug!(device = %device_id, "simulated device reset");
        Ok(())
    }

    async fn reinitialize_device(&self, device_id: &str) -> Result<(), DeviceError> {
        self.simulate_latency().await;
        self.reinits.fetch_add(1, Ordering::Relaxed);
        if self.fail_reinit.load(Ordering::Relaxed) {
            return Err(DeviceError::ReinitFailed {
                device: device_id.to_string(),
                reason: "injected fault".into(),
            });
        }
        debug!(device = %device_id, "simulated device reinitialized");
        Ok(())
    }

    async fn compress_memory(&self) -> Result<(), DeviceError> {
        self.simulate_latency().await;
        self.compressions.fetch_add(1, Ordering::Relaxed);
        if self.fail_compress.load(Ordering::Relaxed) {
            return Err(DeviceError::CompressFailed("injected fault".into()));
        }
        Ok(())
    }

    async fn optimize_compute(&self) -> Result<(), DeviceError> {
        self.simulate_latency().await;
        self.optimizations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for SimulatedDevice {
    async fn latest_snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.timestamp = Utc::now();
        Ok(snapshot)
    }
}
