//! Value objects for settings, meta-data, and fit results.
//!
//! These are the immutable objects exchanged with external collaborators
//! (persistence, reporting). All are plain serde-serializable data; the
//! `ModelArchive` groups them into the four independently-present sections a
//! persisted model may carry.

use serde::{Deserialize, Serialize};

use crate::aperiodic::AperiodicMode;

/// Configuration for one model fit. Immutable once a fit begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Allowed peak bandwidths `(min, max)`, in frequency units (a peak's
    /// bandwidth is twice its Gaussian standard deviation).
    pub peak_width_limits: (f64, f64),

    /// Maximum number of peaks to fit.
    pub max_n_peaks: usize,

    /// Absolute minimum height for a detected peak, in log10 power units.
    pub min_peak_height: f64,

    /// Peak detection threshold, in standard deviations of the flattened
    /// spectrum.
    pub peak_threshold: f64,

    /// The form of the aperiodic component.
    pub aperiodic_mode: AperiodicMode,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            peak_width_limits: (0.5, 12.0),
            max_n_peaks: usize::MAX,
            min_peak_height: 0.0,
            peak_threshold: 2.0,
            aperiodic_mode: AperiodicMode::Fixed,
        }
    }
}

/// The frequency range and resolution actually used for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectrumMetaData {
    /// Frequency range of the fitted spectrum, after any trimming.
    pub freq_range: (f64, f64),

    /// Frequency resolution (spacing between consecutive bins).
    pub freq_res: f64,
}

/// The parameters and diagnostics of one successful model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResults {
    /// Aperiodic parameters: `(offset, exponent)` or `(offset, knee,
    /// exponent)`.
    pub aperiodic_params: Vec<f64>,

    /// Reported peak parameters, as `(center, power, bandwidth)` triples.
    pub peak_params: Vec<[f64; 3]>,

    /// Squared Pearson correlation between observed and modeled spectra.
    pub r_squared: f64,

    /// Reconstruction error of the model fit.
    pub error: f64,

    /// Internal Gaussian parameterization, as `(center, height, std)`
    /// triples.
    pub gaussian_params: Vec<[f64; 3]>,
}

/// The spectrum data a model holds, with power already log-transformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumData {
    pub freqs: Vec<f64>,
    pub power_spectrum: Vec<f64>,
}

/// A persisted model snapshot.
///
/// Any subset of the four groups may be present; loading an archive must
/// leave the model in the same state as if only the present groups had been
/// set through the normal mutation methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelArchive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ModelSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<SpectrumMetaData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SpectrumData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<FitResults>,
}
