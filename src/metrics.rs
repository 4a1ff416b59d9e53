//! Goodness-of-fit and reconstruction error metrics.

use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecParamError};
use crate::utils::stats;

/// Error metric computed over the residual `observed - modeled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorMetric {
    /// Mean absolute error.
    #[default]
    Mae,
    /// Mean squared error.
    Mse,
    /// Root mean squared error.
    Rmse,
}

impl FromStr for ErrorMetric {
    type Err = SpecParamError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "MAE" => Ok(ErrorMetric::Mae),
            "MSE" => Ok(ErrorMetric::Mse),
            "RMSE" => Ok(ErrorMetric::Rmse),
            other => Err(SpecParamError::InvalidParameter(format!(
                "unrecognized error metric '{}'; expected MAE, MSE, or RMSE",
                other
            ))),
        }
    }
}

impl ErrorMetric {
    /// Compute the metric over the residual between two equal-length
    /// spectra.
    pub fn compute(self, observed: &Array1<f64>, modeled: &Array1<f64>) -> Result<f64> {
        if observed.len() != modeled.len() || observed.is_empty() {
            return Err(SpecParamError::InconsistentData(format!(
                "observed and modeled spectra differ in length: {} vs {}",
                observed.len(),
                modeled.len()
            )));
        }
        let n = observed.len() as f64;
        let value = match self {
            ErrorMetric::Mae => {
                observed
                    .iter()
                    .zip(modeled.iter())
                    .map(|(o, m)| (o - m).abs())
                    .sum::<f64>()
                    / n
            }
            ErrorMetric::Mse => {
                observed
                    .iter()
                    .zip(modeled.iter())
                    .map(|(o, m)| (o - m).powi(2))
                    .sum::<f64>()
                    / n
            }
            ErrorMetric::Rmse => {
                (observed
                    .iter()
                    .zip(modeled.iter())
                    .map(|(o, m)| (o - m).powi(2))
                    .sum::<f64>()
                    / n)
                    .sqrt()
            }
        };
        Ok(value)
    }
}

/// Squared Pearson correlation coefficient between observed and modeled
/// spectra.
///
/// This is the correlation-based definition, not the residual-sum-of-squares
/// formula.
pub fn r_squared(observed: &Array1<f64>, modeled: &Array1<f64>) -> Result<f64> {
    if observed.len() != modeled.len() || observed.is_empty() {
        return Err(SpecParamError::InconsistentData(format!(
            "observed and modeled spectra differ in length: {} vs {}",
            observed.len(),
            modeled.len()
        )));
    }
    let r = stats::pearson_r(observed, modeled);
    Ok(r * r)
}
