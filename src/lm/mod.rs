//! Bounded Levenberg-Marquardt optimization.
//!
//! This module provides the damped nonlinear least-squares solver used by
//! both fitting stages, with box bounds and a hard function-evaluation
//! ceiling.

pub mod algorithm;
pub mod config;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
