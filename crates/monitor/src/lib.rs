//! Feedback inputs around the admission core: telemetry polling with
//! threshold alerts, the batch-size knob, and the bridge between them.

pub mod alert;
pub mod feedback;
pub mod knob;
pub mod monitor;

pub use alert::{AlertMetric, ThresholdAlert};
pub use feedback::spawn_pressure_feedback;
pub use knob::{BatchSizeKnob, KnobChange};
pub use monitor::PerformanceMonitor;
