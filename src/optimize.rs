//! Joint optimization of aperiodic and peak parameters.
//!
//! The final fitting stage: one simultaneous bounded least-squares fit over
//! the aperiodic parameters and every candidate peak's `(center, height,
//! std)` triple, minimizing the residual between the reconstructed log-power
//! spectrum and the observed one.

use ndarray::Array1;

use crate::aperiodic::{aperiodic_bounds, aperiodic_value, gen_aperiodic, AperiodicMode};
use crate::error::Result;
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::peaks::{gen_peaks, PeakTuning};
use crate::problem::Problem;

/// Outcome of a successful joint fit.
#[derive(Debug, Clone)]
pub struct JointFit {
    pub aperiodic_params: Vec<f64>,
    /// Internal Gaussian triples `(center, height, std)`, sorted by center.
    pub gaussian_params: Vec<[f64; 3]>,
    /// Reported peak triples `(center, power, bandwidth)`.
    pub peak_params: Vec<[f64; 3]>,
    /// Full reconstructed model, aperiodic plus peaks.
    pub modeled_spectrum: Array1<f64>,
    /// Aperiodic component alone.
    pub ap_fit: Array1<f64>,
    /// Summed peak component alone.
    pub peak_fit: Array1<f64>,
}

/// Residuals of the full model against the observed spectrum.
///
/// Parameter vector layout: aperiodic parameters first, then consecutive
/// `(center, height, std)` triples in candidate order.
struct SpectralProblem<'a> {
    mode: AperiodicMode,
    n_peaks: usize,
    freqs: &'a Array1<f64>,
    powers: &'a Array1<f64>,
}

impl SpectralProblem<'_> {
    fn model_value(&self, params: &[f64], freq: f64) -> f64 {
        let n_ap = self.mode.n_params();
        let mut value = aperiodic_value(self.mode, &params[..n_ap], freq);
        for k in 0..self.n_peaks {
            let center = params[n_ap + 3 * k];
            let height = params[n_ap + 3 * k + 1];
            let std = params[n_ap + 3 * k + 2];
            let arg = (freq - center) / std;
            value += height * (-0.5 * arg * arg).exp();
        }
        value
    }
}

impl Problem for SpectralProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let p = params.to_vec();
        Ok(self
            .freqs
            .iter()
            .zip(self.powers.iter())
            .map(|(f, y)| self.model_value(&p, *f) - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        self.mode.n_params() + 3 * self.n_peaks
    }

    fn residual_count(&self) -> usize {
        self.freqs.len()
    }
}

/// Performs the final simultaneous fit and reconstructs the model.
pub struct JointOptimizer<'a> {
    freqs: &'a Array1<f64>,
    power_spectrum: &'a Array1<f64>,
    mode: AperiodicMode,
    freq_range: (f64, f64),
    std_limits: (f64, f64),
    tuning: PeakTuning,
    max_nfev: usize,
}

impl<'a> JointOptimizer<'a> {
    pub fn new(
        freqs: &'a Array1<f64>,
        power_spectrum: &'a Array1<f64>,
        mode: AperiodicMode,
        freq_range: (f64, f64),
        std_limits: (f64, f64),
        tuning: PeakTuning,
        max_nfev: usize,
    ) -> Self {
        Self {
            freqs,
            power_spectrum,
            mode,
            freq_range,
            std_limits,
            tuning,
            max_nfev,
        }
    }

    /// Fit all parameters jointly from the given seeds.
    ///
    /// An empty candidate list degenerates to a pure aperiodic fit, which is
    /// still a valid result. Solver failures (budget exhausted, singular
    /// normal equations) propagate as [`crate::SpecParamError::Fit`].
    pub fn fit(&self, ap_guess: &[f64], peak_guesses: &[[f64; 3]]) -> Result<JointFit> {
        let n_ap = self.mode.n_params();
        let n_peaks = peak_guesses.len();

        let mut guess = Vec::with_capacity(n_ap + 3 * n_peaks);
        guess.extend_from_slice(ap_guess);
        let mut bounds = aperiodic_bounds(self.mode);

        let (f_lo, f_hi) = self.freq_range;
        let (std_lo, std_hi) = self.std_limits;
        for peak in peak_guesses {
            let [center, height, std] = *peak;

            // Tighten the center bound around the guess, within the fitted
            // range.
            let half_window = 2.0 * self.tuning.cf_bound * std;
            let mut c_lo = (center - half_window).max(f_lo);
            let mut c_hi = (center + half_window).min(f_hi);
            if c_lo >= c_hi {
                c_lo = f_lo;
                c_hi = f_hi;
            }

            guess.push(center.clamp(c_lo, c_hi));
            guess.push(height.max(0.0));
            guess.push(std.clamp(std_lo, std_hi));

            bounds.push((c_lo, c_hi));
            bounds.push((0.0, f64::INFINITY));
            bounds.push((std_lo, std_hi));
        }

        let problem = SpectralProblem {
            mode: self.mode,
            n_peaks,
            freqs: self.freqs,
            powers: self.power_spectrum,
        };
        let config = LmConfig {
            max_nfev: self.max_nfev,
            ..LmConfig::default()
        };
        let result = LevenbergMarquardt::with_config(config).minimize(
            &problem,
            Array1::from_vec(guess),
            &bounds,
        )?;

        let fitted = result.params.to_vec();
        let aperiodic_params = fitted[..n_ap].to_vec();
        let mut gaussian_params: Vec<[f64; 3]> = (0..n_peaks)
            .map(|k| {
                [
                    fitted[n_ap + 3 * k],
                    fitted[n_ap + 3 * k + 1],
                    fitted[n_ap + 3 * k + 2],
                ]
            })
            .collect();
        gaussian_params
            .sort_by(|a, b| a[0].partial_cmp(&b[0]).unwrap_or(std::cmp::Ordering::Equal));

        let ap_fit = gen_aperiodic(self.mode, &aperiodic_params, self.freqs);
        let peak_fit = gen_peaks(&gaussian_params, self.freqs);
        let modeled_spectrum = &ap_fit + &peak_fit;

        let peak_params = self.report_peaks(&gaussian_params, &modeled_spectrum, &ap_fit);

        Ok(JointFit {
            aperiodic_params,
            gaussian_params,
            peak_params,
            modeled_spectrum,
            ap_fit,
            peak_fit,
        })
    }

    /// Rescale internal Gaussians into reported peak parameters: power is
    /// the model height above the aperiodic component at the bin nearest the
    /// center, and bandwidth is twice the Gaussian standard deviation.
    fn report_peaks(
        &self,
        gaussians: &[[f64; 3]],
        modeled: &Array1<f64>,
        ap_fit: &Array1<f64>,
    ) -> Vec<[f64; 3]> {
        gaussians
            .iter()
            .map(|g| {
                let mut nearest = 0usize;
                let mut best = f64::INFINITY;
                for (i, f) in self.freqs.iter().enumerate() {
                    let d = (f - g[0]).abs();
                    if d < best {
                        best = d;
                        nearest = i;
                    }
                }
                [g[0], modeled[nearest] - ap_fit[nearest], 2.0 * g[2]]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peaks::gaussian_value;
    use approx::assert_relative_eq;

    fn freq_axis() -> Array1<f64> {
        let n = ((50.0 - 3.0) / 0.5) as usize + 1;
        Array1::from_iter((0..n).map(|i| 3.0 + i as f64 * 0.5))
    }

    fn optimizer<'a>(freqs: &'a Array1<f64>, powers: &'a Array1<f64>) -> JointOptimizer<'a> {
        JointOptimizer::new(
            freqs,
            powers,
            AperiodicMode::Fixed,
            (3.0, 50.0),
            (0.25, 6.0),
            PeakTuning::default(),
            5000,
        )
    }

    #[test]
    fn test_joint_fit_recovers_parameters() {
        let freqs = freq_axis();
        let powers = freqs.mapv(|f| {
            1.0 - 2.0 * f.log10() + gaussian_value(10.0, 0.5, 1.0, f)
        });

        let opt = optimizer(&freqs, &powers);
        let fit = opt
            .fit(&[0.9, 1.9], &[[10.3, 0.4, 1.2]])
            .unwrap();

        assert_relative_eq!(fit.aperiodic_params[0], 1.0, epsilon = 1e-2);
        assert_relative_eq!(fit.aperiodic_params[1], 2.0, epsilon = 1e-2);
        assert_eq!(fit.gaussian_params.len(), 1);
        assert_relative_eq!(fit.gaussian_params[0][0], 10.0, epsilon = 0.1);
        assert_relative_eq!(fit.gaussian_params[0][1], 0.5, epsilon = 0.05);
        assert_relative_eq!(fit.gaussian_params[0][2], 1.0, epsilon = 0.1);

        // Reported bandwidth is twice the internal std.
        assert_relative_eq!(
            fit.peak_params[0][2],
            2.0 * fit.gaussian_params[0][2],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_empty_candidates_degenerate_to_aperiodic_fit() {
        let freqs = freq_axis();
        let powers = freqs.mapv(|f| 1.0 - 2.0 * f.log10());

        let opt = optimizer(&freqs, &powers);
        let fit = opt.fit(&[0.9, 1.9], &[]).unwrap();

        assert!(fit.gaussian_params.is_empty());
        assert!(fit.peak_params.is_empty());
        assert_relative_eq!(fit.aperiodic_params[1], 2.0, epsilon = 1e-3);
        for (m, a) in fit.modeled_spectrum.iter().zip(fit.ap_fit.iter()) {
            assert_relative_eq!(m, a, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_bounds_clip_widths() {
        let freqs = freq_axis();
        let powers = freqs.mapv(|f| {
            1.0 - 2.0 * f.log10() + gaussian_value(20.0, 0.5, 1.0, f)
        });

        let opt = JointOptimizer::new(
            &freqs,
            &powers,
            AperiodicMode::Fixed,
            (3.0, 50.0),
            (2.0, 6.0), // force a wider-than-true lower bound
            PeakTuning::default(),
            5000,
        );
        let fit = opt.fit(&[1.0, 2.0], &[[20.0, 0.5, 2.0]]).unwrap();
        assert!(fit.gaussian_params[0][2] >= 2.0);
    }
}
