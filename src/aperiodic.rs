//! Aperiodic background model and fitting.
//!
//! The aperiodic component is the smooth, monotonically decaying part of a
//! power spectrum. Two parametric forms are supported: a pure power law
//! (`fixed`) and a power law with a low-frequency bend (`knee`). Fitting is
//! done in log10 power against the (optionally peak-masked) spectrum.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecParamError};
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::problem::Problem;
use crate::utils::stats;

const FREE: (f64, f64) = (f64::NEG_INFINITY, f64::INFINITY);

/// Percentile of the flattened spectrum below which points are treated as
/// peak-free when re-fitting the background.
const ROBUST_PERCENTILE_THRESH: f64 = 0.025;

/// The parametric form of the aperiodic component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AperiodicMode {
    /// Pure power law: `log10(P) = offset - exponent * log10(f)`.
    #[default]
    Fixed,
    /// Bent power law: `log10(P) = offset - log10(knee + f^exponent)`.
    Knee,
}

impl AperiodicMode {
    /// Number of aperiodic parameters for this mode.
    pub fn n_params(self) -> usize {
        match self {
            AperiodicMode::Fixed => 2,
            AperiodicMode::Knee => 3,
        }
    }

    /// Infer the mode from a stored parameter count (2 => fixed, 3 => knee).
    pub fn from_n_params(n: usize) -> Result<Self> {
        match n {
            2 => Ok(AperiodicMode::Fixed),
            3 => Ok(AperiodicMode::Knee),
            other => Err(SpecParamError::Data(format!(
                "cannot infer aperiodic mode from {} parameters",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AperiodicMode::Fixed => "fixed",
            AperiodicMode::Knee => "knee",
        }
    }
}

/// Evaluate the aperiodic model at a single frequency, in log10 power.
pub fn aperiodic_value(mode: AperiodicMode, params: &[f64], freq: f64) -> f64 {
    match mode {
        AperiodicMode::Fixed => params[0] - params[1] * freq.log10(),
        AperiodicMode::Knee => params[0] - (params[1] + freq.powf(params[2])).log10(),
    }
}

/// Evaluate the aperiodic model across a frequency axis.
pub fn gen_aperiodic(mode: AperiodicMode, params: &[f64], freqs: &Array1<f64>) -> Array1<f64> {
    freqs.mapv(|f| aperiodic_value(mode, params, f))
}

/// Box bounds for the aperiodic parameters: offset free, knee and exponent
/// non-negative.
pub fn aperiodic_bounds(mode: AperiodicMode) -> Vec<(f64, f64)> {
    match mode {
        AperiodicMode::Fixed => vec![FREE, (0.0, f64::INFINITY)],
        AperiodicMode::Knee => vec![FREE, (0.0, f64::INFINITY), (0.0, f64::INFINITY)],
    }
}

/// Least-squares problem for the aperiodic model alone.
struct AperiodicProblem {
    mode: AperiodicMode,
    freqs: Array1<f64>,
    powers: Array1<f64>,
}

impl Problem for AperiodicProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let p = params.to_vec();
        Ok(self
            .freqs
            .iter()
            .zip(self.powers.iter())
            .map(|(f, y)| aperiodic_value(self.mode, &p, *f) - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        self.mode.n_params()
    }

    fn residual_count(&self) -> usize {
        self.freqs.len()
    }
}

/// Fits the aperiodic background to a spectrum.
///
/// Supplies the initial background estimate and the guess/bounds seeds that
/// the joint optimization stage refines.
pub struct AperiodicFitter<'a> {
    freqs: &'a Array1<f64>,
    power_spectrum: &'a Array1<f64>,
    mode: AperiodicMode,
    max_nfev: usize,
}

impl<'a> AperiodicFitter<'a> {
    pub fn new(
        freqs: &'a Array1<f64>,
        power_spectrum: &'a Array1<f64>,
        mode: AperiodicMode,
        max_nfev: usize,
    ) -> Self {
        Self {
            freqs,
            power_spectrum,
            mode,
            max_nfev,
        }
    }

    /// Analytic guess for the fixed mode: offset from the first sample,
    /// exponent from the end-to-end slope in log-log space.
    fn guess_fixed(&self) -> Vec<f64> {
        let n = self.power_spectrum.len();
        let offset = self.power_spectrum[0];
        let d_power = self.power_spectrum[n - 1] - self.power_spectrum[0];
        let d_logf = self.freqs[n - 1].log10() - self.freqs[0].log10();
        let exponent = if d_logf.abs() > 0.0 {
            (d_power / d_logf).abs()
        } else {
            1.0
        };
        vec![offset, exponent]
    }

    fn fit_points(
        &self,
        freqs: Array1<f64>,
        powers: Array1<f64>,
        guess: Vec<f64>,
        mode: AperiodicMode,
    ) -> Result<Vec<f64>> {
        let problem = AperiodicProblem {
            mode,
            freqs,
            powers,
        };
        let config = LmConfig {
            max_nfev: self.max_nfev,
            ..LmConfig::default()
        };
        let result = LevenbergMarquardt::with_config(config).minimize(
            &problem,
            Array1::from_vec(guess),
            &aperiodic_bounds(mode),
        )?;
        Ok(result.params.to_vec())
    }

    /// Fit the aperiodic model to the full, unmasked spectrum.
    ///
    /// In knee mode the fixed-mode fit seeds the guess: offset and exponent
    /// are copied, and the knee starts at the frequency of largest deviation
    /// from the straight-line fit, raised to the exponent guess.
    pub fn simple_fit(&self) -> Result<Vec<f64>> {
        let fixed = self.fit_points(
            self.freqs.clone(),
            self.power_spectrum.clone(),
            self.guess_fixed(),
            AperiodicMode::Fixed,
        )?;

        match self.mode {
            AperiodicMode::Fixed => Ok(fixed),
            AperiodicMode::Knee => {
                let line = gen_aperiodic(AperiodicMode::Fixed, &fixed, self.freqs);
                let deviation = (self.power_spectrum - &line).mapv(f64::abs);
                let knee_guess = match stats::argmax(&deviation) {
                    Some((ind, _)) => self.freqs[ind].powf(fixed[1]).max(0.0),
                    None => 0.0,
                };
                let guess = vec![fixed[0], knee_guess, fixed[1]];
                self.fit_points(
                    self.freqs.clone(),
                    self.power_spectrum.clone(),
                    guess,
                    AperiodicMode::Knee,
                )
            }
        }
    }

    /// Fit the aperiodic model while ignoring peak regions.
    ///
    /// Flattens the spectrum with a first simple fit, zeroes negative
    /// residuals, and drops every point whose residual sits above a low
    /// percentile threshold, so that only background-dominated points
    /// constrain the refit.
    pub fn robust_fit(&self) -> Result<Vec<f64>> {
        let popt = self.simple_fit()?;
        let initial = gen_aperiodic(self.mode, &popt, self.freqs);
        let flat = (self.power_spectrum - &initial).mapv(|v| v.max(0.0));

        let thresh = stats::percentile(&flat.to_vec(), ROBUST_PERCENTILE_THRESH);
        let mut keep_freqs = Vec::new();
        let mut keep_powers = Vec::new();
        for i in 0..flat.len() {
            if flat[i] <= thresh {
                keep_freqs.push(self.freqs[i]);
                keep_powers.push(self.power_spectrum[i]);
            }
        }

        // Not enough background-only points to constrain a refit.
        if keep_freqs.len() <= self.mode.n_params() + 1 {
            return Ok(popt);
        }

        self.fit_points(
            Array1::from_vec(keep_freqs),
            Array1::from_vec(keep_powers),
            popt,
            self.mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn log_freqs(lo: f64, hi: f64, res: f64) -> Array1<f64> {
        let n = ((hi - lo) / res).round() as usize + 1;
        Array1::from_iter((0..n).map(|i| lo + i as f64 * res))
    }

    #[test]
    fn test_mode_inference() {
        assert_eq!(AperiodicMode::from_n_params(2).unwrap(), AperiodicMode::Fixed);
        assert_eq!(AperiodicMode::from_n_params(3).unwrap(), AperiodicMode::Knee);
        assert!(AperiodicMode::from_n_params(4).is_err());
    }

    #[test]
    fn test_gen_aperiodic_fixed() {
        let freqs = Array1::from_vec(vec![1.0, 10.0, 100.0]);
        let values = gen_aperiodic(AperiodicMode::Fixed, &[1.0, 2.0], &freqs);
        assert_relative_eq!(values[0], 1.0);
        assert_relative_eq!(values[1], -1.0);
        assert_relative_eq!(values[2], -3.0);
    }

    #[test]
    fn test_gen_aperiodic_knee() {
        let freqs = Array1::from_vec(vec![1.0, 3.0]);
        let values = gen_aperiodic(AperiodicMode::Knee, &[2.0, 10.0, 2.0], &freqs);
        assert_relative_eq!(values[0], 2.0 - 11.0f64.log10(), epsilon = 1e-12);
        assert_relative_eq!(values[1], 2.0 - 19.0f64.log10(), epsilon = 1e-12);
    }

    #[test]
    fn test_simple_fit_recovers_power_law() {
        let freqs = log_freqs(3.0, 50.0, 0.5);
        let powers = gen_aperiodic(AperiodicMode::Fixed, &[1.0, 2.0], &freqs);
        let fitter = AperiodicFitter::new(&freqs, &powers, AperiodicMode::Fixed, 5000);

        let params = fitter.simple_fit().unwrap();
        assert_relative_eq!(params[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(params[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_robust_fit_ignores_peak_region() {
        let freqs = log_freqs(3.0, 50.0, 0.5);
        let mut powers = gen_aperiodic(AperiodicMode::Fixed, &[1.0, 2.0], &freqs);
        // Inject a bump around 10 Hz that a plain fit would absorb.
        for i in 0..freqs.len() {
            let arg = (freqs[i] - 10.0) / 1.5;
            powers[i] += 0.6 * (-0.5 * arg * arg).exp();
        }
        let fitter = AperiodicFitter::new(&freqs, &powers, AperiodicMode::Fixed, 5000);

        let params = fitter.robust_fit().unwrap();
        assert_relative_eq!(params[0], 1.0, epsilon = 0.05);
        assert_relative_eq!(params[1], 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_knee_fit_recovers_parameters() {
        let freqs = log_freqs(1.0, 150.0, 0.5);
        let powers = gen_aperiodic(AperiodicMode::Knee, &[2.0, 25.0, 2.0], &freqs);
        let fitter = AperiodicFitter::new(&freqs, &powers, AperiodicMode::Knee, 5000);

        let params = fitter.simple_fit().unwrap();
        assert_relative_eq!(params[0], 2.0, epsilon = 0.05);
        assert_relative_eq!(params[1], 25.0, epsilon = 2.5);
        assert_relative_eq!(params[2], 2.0, epsilon = 0.05);
    }
}
