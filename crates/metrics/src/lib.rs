//! Metrics for herald.
//!
//! This crate provides metric names and a recorder built on the `metrics` crate
//! facade. Crates record through the re-exported macros behind their own
//! `metrics` feature; without a recorder installed every call is a no-op.
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald_metrics::{counter, dispatch, labels};
//!
//! counter!(dispatch::MESSAGES_RECEIVED_TOTAL, labels::KIND => "text").increment(1);
//! ```
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render its text format

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
