//! # specparam
//!
//! `specparam` decomposes a measured power spectrum into a smooth aperiodic
//! background and a set of localized Gaussian peaks, via bounded nonlinear
//! least-squares fitting.
//!
//! The library provides:
//! - Validation and log-transformation of raw frequency/power arrays
//! - Aperiodic background fitting, as a pure power law or with a knee
//! - Iterative peak detection from the flattened spectrum
//! - A joint Levenberg-Marquardt fit of all parameters with box bounds
//! - Goodness-of-fit diagnostics (error metrics and R²)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use specparam::{ModelSettings, SpectralModel};
//!
//! let freqs: Vec<f64> = (6..101).map(|i| i as f64 * 0.5).collect();
//! let powers: Vec<f64> = freqs.iter().map(|f| 10.0 / (f * f)).collect();
//!
//! let mut model = SpectralModel::with_settings(ModelSettings {
//!     max_n_peaks: 6,
//!     ..ModelSettings::default()
//! });
//! model.fit_with(&freqs, &powers, None)?;
//!
//! if model.has_model() {
//!     let results = model.get_results()?;
//!     println!("exponent: {}", results.aperiodic_params[1]);
//! }
//! # Ok::<(), specparam::SpecParamError>(())
//! ```

// Public modules
pub mod aperiodic;
pub mod data;
pub mod error;
pub mod metrics;
pub mod model;
pub mod optimize;
pub mod peaks;
pub mod problem;
pub mod validate;

pub mod lm;

mod utils;

// Re-exports for convenience
pub use aperiodic::AperiodicMode;
pub use data::{FitResults, ModelArchive, ModelSettings, SpectrumData, SpectrumMetaData};
pub use error::{Result, SpecParamError};
pub use metrics::ErrorMetric;
pub use model::SpectralModel;
pub use peaks::PeakTuning;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
