//! The spectral model object: data ingestion, fit orchestration, and result
//! accessors.
//!
//! `SpectralModel` owns one spectrum, one set of settings, and (after a
//! successful fit) one set of results. It sequences the pipeline:
//! validation, initial aperiodic estimate, iterative peak detection, joint
//! optimization, and goodness-of-fit metrics. Solver failures are swallowed
//! in normal mode (the model returns to the unset state) and propagated in
//! debug mode.

use ndarray::Array1;

use crate::aperiodic::{gen_aperiodic, AperiodicFitter, AperiodicMode};
use crate::data::{FitResults, ModelArchive, ModelSettings, SpectrumData, SpectrumMetaData};
use crate::error::{Result, SpecParamError};
use crate::metrics::{self, ErrorMetric};
use crate::optimize::{JointFit, JointOptimizer};
use crate::peaks::{gen_peaks, PeakFinder, PeakTuning};
use crate::validate;

/// Default hard ceiling on solver function evaluations.
const DEFAULT_MAX_NFEV: usize = 5000;

struct FitOutcome {
    joint: JointFit,
    r_squared: f64,
    error: f64,
}

/// A parameterized model of one power spectrum.
#[derive(Debug, Clone)]
pub struct SpectralModel {
    settings: ModelSettings,
    // Whether settings were set explicitly, as opposed to defaults. Decides
    // whether a stored mode tag exists when loading results.
    explicit_settings: bool,
    check_data: bool,
    debug: bool,
    error_metric: ErrorMetric,
    tuning: PeakTuning,
    max_nfev: usize,

    freqs: Option<Array1<f64>>,
    power_spectrum: Option<Array1<f64>>,
    meta_data: Option<SpectrumMetaData>,

    // Result fields; NaN-filled placeholders while unset.
    aperiodic_params: Array1<f64>,
    gaussian_params: Vec<[f64; 3]>,
    peak_params: Vec<[f64; 3]>,
    r_squared: f64,
    error: f64,
    modeled_spectrum: Option<Array1<f64>>,
    ap_fit: Option<Array1<f64>>,
    peak_fit: Option<Array1<f64>>,
    fit_message: Option<String>,
}

impl Default for SpectralModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralModel {
    /// Create an empty model with default settings.
    pub fn new() -> Self {
        let settings = ModelSettings::default();
        let n_ap = settings.aperiodic_mode.n_params();
        Self {
            settings,
            explicit_settings: false,
            check_data: true,
            debug: false,
            error_metric: ErrorMetric::default(),
            tuning: PeakTuning::default(),
            max_nfev: DEFAULT_MAX_NFEV,
            freqs: None,
            power_spectrum: None,
            meta_data: None,
            aperiodic_params: Array1::from_elem(n_ap, f64::NAN),
            gaussian_params: Vec::new(),
            peak_params: Vec::new(),
            r_squared: f64::NAN,
            error: f64::NAN,
            modeled_spectrum: None,
            ap_fit: None,
            peak_fit: None,
            fit_message: None,
        }
    }

    /// Create an empty model with the given settings.
    pub fn with_settings(settings: ModelSettings) -> Self {
        let mut model = Self::new();
        model.add_settings(settings);
        model
    }

    /// Enable or disable debug mode. In debug mode solver failures
    /// propagate out of [`fit`](Self::fit) instead of nulling the results.
    pub fn set_debug_mode(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn debug_mode(&self) -> bool {
        self.debug
    }

    /// Enable or disable input data checking. With checking disabled,
    /// non-finite input no longer raises; a fit on such data completes with
    /// no model instead.
    pub fn set_check_data_mode(&mut self, check_data: bool) {
        self.check_data = check_data;
    }

    pub fn check_data_mode(&self) -> bool {
        self.check_data
    }

    /// Override the solver evaluation ceiling.
    pub fn set_max_nfev(&mut self, max_nfev: usize) {
        self.max_nfev = max_nfev;
    }

    /// Select the error metric reported by fits.
    pub fn set_error_metric(&mut self, metric: ErrorMetric) {
        self.error_metric = metric;
    }

    /// Override the peak post-processing thresholds.
    pub fn set_peak_tuning(&mut self, tuning: PeakTuning) {
        self.tuning = tuning;
    }

    /// Whether the model holds a spectrum.
    pub fn has_data(&self) -> bool {
        self.power_spectrum.is_some()
    }

    /// Whether the model holds fit results.
    pub fn has_model(&self) -> bool {
        self.aperiodic_params.iter().any(|v| v.is_finite())
    }

    /// Number of fitted peaks.
    pub fn n_peaks(&self) -> usize {
        self.peak_params.len()
    }

    pub fn freqs(&self) -> Option<&Array1<f64>> {
        self.freqs.as_ref()
    }

    /// The stored spectrum, in log10 power.
    pub fn power_spectrum(&self) -> Option<&Array1<f64>> {
        self.power_spectrum.as_ref()
    }

    /// The reconstructed model spectrum, if a fit is present.
    pub fn modeled_spectrum(&self) -> Option<&Array1<f64>> {
        self.modeled_spectrum.as_ref()
    }

    /// Diagnostic message from the last failed fit, if any.
    pub fn fit_message(&self) -> Option<&str> {
        self.fit_message.as_deref()
    }

    /// Replace the model settings. Clears any existing results, since they
    /// would no longer describe the configuration.
    pub fn add_settings(&mut self, settings: ModelSettings) {
        self.settings = settings;
        self.explicit_settings = true;
        self.reset_results();
    }

    /// Attach meta-data, as when populating from a persisted state.
    pub fn add_meta_data(&mut self, meta_data: SpectrumMetaData) {
        self.meta_data = Some(meta_data);
    }

    /// Validate and store a spectrum.
    ///
    /// `powers` is raw (non-log) power; the stored spectrum is its log10.
    /// With `clear_results` set, any prior fit results are wiped; unset, they
    /// are retained (the load path repopulates data and results
    /// independently).
    pub fn add_data(
        &mut self,
        freqs: &[f64],
        powers: &[f64],
        freq_range: Option<(f64, f64)>,
        clear_results: bool,
    ) -> Result<()> {
        let validated = validate::prepare_spectrum(freqs, powers, freq_range, self.check_data)?;
        if clear_results {
            self.reset_results();
        }
        self.freqs = Some(validated.freqs);
        self.power_spectrum = Some(validated.power_spectrum);
        self.meta_data = Some(validated.meta_data);
        Ok(())
    }

    /// Attach externally-produced fit results, as when loading.
    ///
    /// The aperiodic mode is reconciled with the stored parameter count: an
    /// explicitly-set mode tag wins, and a count that contradicts it is a
    /// data error; with only default settings the mode is inferred from the
    /// count (2 => fixed, 3 => knee).
    pub fn add_results(&mut self, results: FitResults) -> Result<()> {
        let inferred = AperiodicMode::from_n_params(results.aperiodic_params.len())?;
        if self.explicit_settings && inferred != self.settings.aperiodic_mode {
            return Err(SpecParamError::Data(format!(
                "stored aperiodic parameter count implies '{}' mode, but settings specify '{}'",
                inferred.as_str(),
                self.settings.aperiodic_mode.as_str()
            )));
        }
        self.settings.aperiodic_mode = inferred;

        self.aperiodic_params = Array1::from_vec(results.aperiodic_params);
        self.gaussian_params = results.gaussian_params;
        self.peak_params = results.peak_params;
        self.r_squared = results.r_squared;
        self.error = results.error;
        self.fit_message = None;
        self.regenerate_model();
        Ok(())
    }

    /// Fit the stored spectrum.
    ///
    /// Fails with [`SpecParamError::NoData`] when no spectrum is present.
    /// Solver failures null the results and return `Ok` in normal mode, and
    /// propagate in debug mode.
    pub fn fit(&mut self) -> Result<()> {
        if !self.has_data() {
            return Err(SpecParamError::NoData);
        }
        match self.run_fit() {
            Ok(outcome) => {
                self.store_outcome(outcome);
                Ok(())
            }
            Err(SpecParamError::Fit(message)) if !self.debug => {
                self.reset_results();
                self.fit_message = Some(message);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Validate, store, and fit a spectrum in one call.
    pub fn fit_with(
        &mut self,
        freqs: &[f64],
        powers: &[f64],
        freq_range: Option<(f64, f64)>,
    ) -> Result<()> {
        self.add_data(freqs, powers, freq_range, true)?;
        self.fit()
    }

    /// Recompute the reconstruction error with the given metric, from the
    /// stored observed and modeled spectra.
    pub fn compute_error(&self, metric: ErrorMetric) -> Result<f64> {
        let observed = self.power_spectrum.as_ref().ok_or(SpecParamError::NoData)?;
        let modeled = self.modeled_spectrum.as_ref().ok_or(SpecParamError::NoModel)?;
        metric.compute(observed, modeled)
    }

    /// Clear the stored spectrum and meta-data.
    pub fn reset_data(&mut self) {
        self.freqs = None;
        self.power_spectrum = None;
        self.meta_data = None;
    }

    /// Clear all result fields back to their unset placeholders.
    pub fn reset_results(&mut self) {
        self.aperiodic_params =
            Array1::from_elem(self.settings.aperiodic_mode.n_params(), f64::NAN);
        self.gaussian_params = Vec::new();
        self.peak_params = Vec::new();
        self.r_squared = f64::NAN;
        self.error = f64::NAN;
        self.modeled_spectrum = None;
        self.ap_fit = None;
        self.peak_fit = None;
        self.fit_message = None;
    }

    /// Clear both data and results.
    pub fn reset(&mut self) {
        self.reset_data();
        self.reset_results();
    }

    /// The current settings, as an immutable value object.
    pub fn get_settings(&self) -> ModelSettings {
        self.settings.clone()
    }

    /// The meta-data for the fitted range, if data is present.
    pub fn get_meta_data(&self) -> Option<SpectrumMetaData> {
        self.meta_data
    }

    /// The fit results, as an immutable value object.
    pub fn get_results(&self) -> Result<FitResults> {
        if !self.has_model() {
            return Err(SpecParamError::NoModel);
        }
        Ok(FitResults {
            aperiodic_params: self.aperiodic_params.to_vec(),
            peak_params: self.peak_params.clone(),
            r_squared: self.r_squared,
            error: self.error,
            gaussian_params: self.gaussian_params.clone(),
        })
    }

    /// Named sub-arrays of the fitted parameters.
    ///
    /// Components: `aperiodic` (fields `offset`, `knee`, `exponent`),
    /// `peak` and `gaussian` (fields `CF`, `PW`, `BW`), `error`,
    /// `r_squared`. Fails with [`SpecParamError::NoModel`] before a fit and
    /// [`SpecParamError::InvalidParameter`] for unknown selectors.
    pub fn get_params(&self, component: &str, field: Option<&str>) -> Result<Vec<f64>> {
        if !self.has_model() {
            return Err(SpecParamError::NoModel);
        }
        match component {
            "aperiodic" | "aperiodic_params" => {
                let params = self.aperiodic_params.to_vec();
                match field {
                    None => Ok(params),
                    Some("offset") => Ok(vec![params[0]]),
                    Some("exponent") => Ok(vec![params[params.len() - 1]]),
                    Some("knee") if self.settings.aperiodic_mode == AperiodicMode::Knee => {
                        Ok(vec![params[1]])
                    }
                    Some(other) => Err(SpecParamError::InvalidParameter(format!(
                        "unknown aperiodic field '{}' for '{}' mode",
                        other,
                        self.settings.aperiodic_mode.as_str()
                    ))),
                }
            }
            "peak" | "peak_params" => select_column(&self.peak_params, field),
            "gaussian" | "gaussian_params" => select_column(&self.gaussian_params, field),
            "error" => match field {
                None => Ok(vec![self.error]),
                Some(other) => Err(SpecParamError::InvalidParameter(format!(
                    "'error' takes no field, got '{}'",
                    other
                ))),
            },
            "r_squared" => match field {
                None => Ok(vec![self.r_squared]),
                Some(other) => Err(SpecParamError::InvalidParameter(format!(
                    "'r_squared' takes no field, got '{}'",
                    other
                ))),
            },
            other => Err(SpecParamError::InvalidParameter(format!(
                "unknown component '{}'",
                other
            ))),
        }
    }

    /// Snapshot the model into its independently-present persistence groups.
    pub fn to_archive(&self) -> ModelArchive {
        let data = match (&self.freqs, &self.power_spectrum) {
            (Some(f), Some(p)) => Some(SpectrumData {
                freqs: f.to_vec(),
                power_spectrum: p.to_vec(),
            }),
            _ => None,
        };
        ModelArchive {
            settings: self.explicit_settings.then(|| self.settings.clone()),
            meta_data: self.meta_data,
            data,
            results: self.get_results().ok(),
        }
    }

    /// Rebuild a model from a persisted snapshot.
    ///
    /// Any subset of the archive groups may be present; the resulting model
    /// matches one where only those groups had been set directly. When both
    /// data and results are present, the modeled spectrum is regenerated.
    pub fn from_archive(archive: ModelArchive) -> Result<Self> {
        let mut model = Self::new();
        if let Some(settings) = archive.settings {
            model.add_settings(settings);
        }
        if let Some(meta_data) = archive.meta_data {
            model.add_meta_data(meta_data);
        }
        if let Some(data) = archive.data {
            if data.freqs.len() != data.power_spectrum.len() {
                return Err(SpecParamError::InconsistentData(format!(
                    "archived frequency and power arrays differ in length: {} vs {}",
                    data.freqs.len(),
                    data.power_spectrum.len()
                )));
            }
            // Archived power is already log-transformed; bypass re-validation.
            let freqs = Array1::from_vec(data.freqs);
            let powers = Array1::from_vec(data.power_spectrum);
            if model.meta_data.is_none() && freqs.len() >= 2 {
                model.meta_data = Some(SpectrumMetaData {
                    freq_range: (freqs[0], freqs[freqs.len() - 1]),
                    freq_res: freqs[1] - freqs[0],
                });
            }
            model.freqs = Some(freqs);
            model.power_spectrum = Some(powers);
        }
        if let Some(results) = archive.results {
            model.add_results(results)?;
        }
        Ok(model)
    }

    fn store_outcome(&mut self, outcome: FitOutcome) {
        let FitOutcome {
            joint,
            r_squared,
            error,
        } = outcome;
        self.aperiodic_params = Array1::from_vec(joint.aperiodic_params);
        self.gaussian_params = joint.gaussian_params;
        self.peak_params = joint.peak_params;
        self.r_squared = r_squared;
        self.error = error;
        self.modeled_spectrum = Some(joint.modeled_spectrum);
        self.ap_fit = Some(joint.ap_fit);
        self.peak_fit = Some(joint.peak_fit);
        self.fit_message = None;
    }

    /// Rebuild the modeled spectrum from stored parameters and data.
    fn regenerate_model(&mut self) {
        if !self.has_model() {
            return;
        }
        if let Some(freqs) = &self.freqs {
            let mode = self.settings.aperiodic_mode;
            let ap_fit = gen_aperiodic(mode, &self.aperiodic_params.to_vec(), freqs);
            let peak_fit = gen_peaks(&self.gaussian_params, freqs);
            self.modeled_spectrum = Some(&ap_fit + &peak_fit);
            self.ap_fit = Some(ap_fit);
            self.peak_fit = Some(peak_fit);
        }
    }

    /// The fitting pipeline proper: initial background estimate, iterative
    /// peak detection on the flattened spectrum, joint optimization, and
    /// metrics.
    fn run_fit(&self) -> Result<FitOutcome> {
        let freqs = self.freqs.as_ref().ok_or(SpecParamError::NoData)?;
        let powers = self.power_spectrum.as_ref().ok_or(SpecParamError::NoData)?;
        let meta_data = self.meta_data.ok_or(SpecParamError::NoData)?;

        // With data checking disabled, degenerate input reaches this point;
        // it must null the fit rather than reach the solver.
        if powers.iter().any(|v| !v.is_finite()) || freqs.iter().any(|v| !v.is_finite()) {
            return Err(SpecParamError::Fit(
                "spectrum contains non-finite values".to_string(),
            ));
        }

        let mode = self.settings.aperiodic_mode;
        let ap_fitter = AperiodicFitter::new(freqs, powers, mode, self.max_nfev);
        let ap_seed = ap_fitter.robust_fit()?;

        let initial_ap = gen_aperiodic(mode, &ap_seed, freqs);
        let flattened = powers - &initial_ap;

        let finder = PeakFinder::new(
            freqs,
            meta_data.freq_res,
            meta_data.freq_range,
            &self.settings,
            self.tuning,
        );
        let candidates = finder.find_peaks(&flattened);

        let std_limits = (
            self.settings.peak_width_limits.0 / 2.0,
            self.settings.peak_width_limits.1 / 2.0,
        );
        let joint = JointOptimizer::new(
            freqs,
            powers,
            mode,
            meta_data.freq_range,
            std_limits,
            self.tuning,
            self.max_nfev,
        )
        .fit(&ap_seed, &candidates)?;

        let r_squared = metrics::r_squared(powers, &joint.modeled_spectrum)?;
        let error = self.error_metric.compute(powers, &joint.modeled_spectrum)?;

        Ok(FitOutcome {
            joint,
            r_squared,
            error,
        })
    }
}

fn select_column(triples: &[[f64; 3]], field: Option<&str>) -> Result<Vec<f64>> {
    let col = match field {
        None => {
            return Ok(triples.iter().flatten().copied().collect());
        }
        Some("CF") => 0,
        Some("PW") => 1,
        Some("BW") => 2,
        Some(other) => {
            return Err(SpecParamError::InvalidParameter(format!(
                "unknown peak field '{}'; expected CF, PW, or BW",
                other
            )));
        }
    };
    Ok(triples.iter().map(|t| t[col]).collect())
}
