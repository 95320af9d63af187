//! Metrics collection and export for wabridge.
//!
//! Metric names live in one place so dashboards and code agree on them.
//! Recording goes through the `metrics` crate facade; when the `prometheus`
//! feature is enabled the gateway exposes them on `/metrics`.
//!
//! ```rust,ignore
//! use wabridge_metrics::{counter, webhook};
//!
//! counter!(webhook::DELIVERIES_TOTAL).increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
