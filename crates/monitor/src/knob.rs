use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use accel_core::{TuningConfig, TuningError, TuningKnob};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

/// One applied change to the knob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnobChange {
    pub from: u32,
    pub to: u32,
    /// Requested reduction, or `None` for an explicit `set`.
    pub fraction: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

struct KnobState {
    current: u32,
    last_reduction: Option<Instant>,
    history: Vec<KnobChange>,
}

/// Batch size bounded to `[min, max]` and kept on multiples of `step`.
///
/// Reductions inside the cooldown window after the previous one are accepted
/// and ignored, so several pressure paths can fire at once without
/// compounding.
pub struct BatchSizeKnob {
    min: u32,
    max: u32,
    step: u32,
    cooldown: Duration,
    state: Mutex<KnobState>,
}

impl BatchSizeKnob {
    pub fn new(initial: u32, min: u32, max: u32, step: u32, cooldown: Duration) -> Self {
        let step = step.max(1);
        Self {
            min,
            max,
            step,
            cooldown,
            state: Mutex::new(KnobState {
                current: initial.clamp(min, max),
                last_reduction: None,
                history: Vec::new(),
            }),
        }
    }

    pub fn from_config(config: &TuningConfig) -> Self {
        Self::new(
            config.batch_size,
            config.min_batch_size,
            config.max_batch_size,
            config.batch_step,
            config.cooldown(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, KnobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> u32 {
        self.lock().current
    }

    /// Set the batch size directly, clamped to the range. Returns the value applied.
    pub fn set(&self, value: u32) -> u32 {
        let value = value.clamp(self.min, self.max);
        let mut state = self.lock();
        if state.current != value {
            let change = KnobChange {
                from: state.current,
                to: value,
                fraction: None,
                timestamp: Utc::now(),
            };
            state.current = value;
            state.history.push(change);
        }
        value
    }

    pub fn history(&self) -> Vec<KnobChange> {
        self.lock().history.clone()
    }

    fn round_down_to_step(&self, value: u32) -> u32 {
        (value / self.step) * self.step
    }
}

impl TuningKnob for BatchSizeKnob {
    fn name(&self) -> &str {
        "batch_size"
    }

    fn reduce_knob(&self, fraction: f64) -> Result<(), TuningError> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(TuningError::InvalidFraction(fraction));
        }

        let now = Instant::now();
        let mut state = self.lock();
        if let Some(last) = state.last_reduction {
            if now.duration_since(last) < self.cooldown {
                debug!(fraction, "batch size reduction inside cooldown, ignored");
                return Ok(());
            }
        }

        let scaled = (state.current as f64 * (1.0 - fraction)) as u32;
        let next = self.round_down_to_step(scaled).max(self.min);
        state.last_reduction = Some(now);

        if next != state.current {
            info!(from = state.current, to = next, fraction, "batch size reduced");
            let change = KnobChange {
                from: state.current,
                to: next,
                fraction: Some(fraction),
                timestamp: Utc::now(),
            };
            state.current = next;
            state.history.push(change);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knob(cooldown_ms: u64) -> BatchSizeKnob {
        BatchSizeKnob::new(256, 32, 512, 32, Duration::from_millis(cooldown_ms))
    }

    #[test]
    fn defaults_from_config() {
        let k = BatchSizeKnob::from_config(&TuningConfig::default());
        assert_eq!(k.current(), 256);
        assert_eq!(k.name(), "batch_size");
    }

    #[test]
    fn reduction_snaps_to_step_and_floors_at_min() {
        let k = knob(0);
        k.reduce_knob(0.3).unwrap();
        assert_eq!(k.current(), 160);
        k.reduce_knob(0.3).unwrap();
        assert_eq!(k.current(), 96);
        k.reduce_knob(0.3).unwrap();
        assert_eq!(k.current(), 64);
        k.reduce_knob(0.3).unwrap();
        assert_eq!(k.current(), 32);
        k.reduce_knob(0.9).unwrap();
        assert_eq!(k.current(), 32);

        let history = k.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].from, 256);
        assert_eq!(history[0].to, 160);
        assert_eq!(history[0].fraction, Some(0.3));
    }

    #[test]
    fn invalid_fraction_rejected() {
        let k = knob(0);
        assert_eq!(k.reduce_knob(0.0), Err(TuningError::InvalidFraction(0.0)));
        assert_eq!(k.reduce_knob(1.0), Err(TuningError::InvalidFraction(1.0)));
        assert!(k.reduce_knob(f64::NAN).is_err());
        assert_eq!(k.current(), 256);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_reductions_do_not_compound() {
        let k = knob(1_000);
        k.reduce_knob(0.2).unwrap();
        k.reduce_knob(0.2).unwrap();
        k.reduce_knob(0.2).unwrap();
        assert_eq!(k.current(), 192);

        tokio::time::advance(Duration::from_millis(1_001)).await;
        k.reduce_knob(0.2).unwrap();
        assert_eq!(k.current(), 128);
    }

    #[test]
    fn set_clamps_to_range() {
        let k = knob(0);
        assert_eq!(k.set(4_096), 512);
        assert_eq!(k.set(1), 32);
        assert_eq!(k.current(), 32);
        assert_eq!(k.history().len(), 2);
        assert_eq!(k.history()[0].fraction, None);
    }
}
