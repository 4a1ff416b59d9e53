//! Internal numeric helpers shared across the fitting pipeline.

pub mod finite_difference;
pub mod stats;
