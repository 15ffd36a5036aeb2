use std::sync::Arc;

use accel_core::TuningKnob;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alert::{AlertMetric, ThresholdAlert};

/// Shrink `knob` by `fraction` on every memory-usage alert.
///
/// Runs until the alert channel closes. The knob's own cooldown absorbs
/// bursts of alerts.
pub fn spawn_pressure_feedback(
    mut alerts: broadcast::Receiver<ThresholdAlert>,
    knob: Arc<dyn TuningKnob>,
    fraction: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) if alert.metric == AlertMetric::MemoryUsage => {
                    debug!(value = alert.value, threshold = alert.threshold, "memory pressure alert");
                    if let Err(e) = knob.reduce_knob(fraction) {
                        warn!(knob = knob.name(), error = %e, "pressure feedback could not reduce knob");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "pressure feedback lagging behind alerts");
                }
                Err(RecvError::Closed) => {
                    info!("alert channel closed, pressure feedback stopped");
                    break;
                }
            }
        }
    })
}
