//! Implementation of the bounded Levenberg-Marquardt algorithm.
//!
//! This module contains the core damped least-squares iteration used by both
//! the aperiodic background fit and the joint aperiodic-plus-peaks fit. Box
//! bounds are enforced by projecting each trial step onto the feasible
//! region, and the configured evaluation budget is a hard ceiling: the solver
//! refuses to start a Jacobian or trial evaluation that would exceed it.

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use std::fmt;

use crate::error::{Result, SpecParamError};
use crate::problem::Problem;
use crate::utils::finite_difference;

use super::config::LmConfig;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of iterations performed
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// A message describing the convergence condition
    pub message: String,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new optimizer with default configuration.
    pub fn new() -> Self {
        Self {
            config: LmConfig::default(),
        }
    }

    /// Create a new optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    /// Set the hard ceiling on function evaluations.
    pub fn with_max_nfev(mut self, max_nfev: usize) -> Self {
        self.config.max_nfev = max_nfev;
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Minimize the sum of squared residuals subject to box bounds.
    ///
    /// `bounds` gives an inclusive `(lower, upper)` pair per parameter;
    /// infinite endpoints leave that side unconstrained. The initial guess is
    /// projected into the feasible region before the first evaluation.
    ///
    /// Fails with [`SpecParamError::Fit`] on non-convergence: evaluation
    /// budget exhausted, iteration limit reached, or damping saturated
    /// without finding a cost-reducing step.
    pub fn minimize<P: Problem>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        bounds: &[(f64, f64)],
    ) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params || bounds.len() != n_params {
            return Err(SpecParamError::InvalidParameter(format!(
                "expected {} parameters, got {} with {} bounds",
                n_params,
                initial_params.len(),
                bounds.len()
            )));
        }

        let mut params = initial_params;
        project(&mut params, bounds);

        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1usize;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        if !cost.is_finite() {
            return Err(SpecParamError::Fit(
                "non-finite cost at initial parameter values".to_string(),
            ));
        }

        let mut lambda = self.config.initial_lambda;
        let m = residuals.len();

        for iteration in 0..self.config.max_iterations {
            // A Jacobian costs one evaluation per parameter, plus at least
            // one trial step afterwards.
            if func_evals + n_params + 1 > self.config.max_nfev {
                return Err(SpecParamError::Fit(format!(
                    "exceeded maximum function evaluations ({})",
                    self.config.max_nfev
                )));
            }

            let jac = finite_difference::jacobian(problem, &params, &residuals, None)?;
            func_evals += n_params;

            let j = DMatrix::from_fn(m, n_params, |i, k| jac[[i, k]]);
            let r = DVector::from_fn(m, |i, _| residuals[i]);

            // g = J^T r
            let g = j.transpose() * &r;
            let g_norm = g.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if g_norm < self.config.gtol {
                return Ok(LmResult {
                    params,
                    residuals,
                    cost,
                    iterations: iteration,
                    func_evals,
                    message: format!(
                        "gradient convergence: ||g|| = {:.2e} < {:.2e}",
                        g_norm, self.config.gtol
                    ),
                });
            }

            let jtj = j.transpose() * &j;
            let neg_g = g.map(|v| -v);

            // Inner loop: adjust damping until a step reduces the cost.
            loop {
                let mut damped = jtj.clone();
                for k in 0..n_params {
                    let d = jtj[(k, k)].max(1e-12);
                    damped[(k, k)] += lambda * d;
                }

                let step = match damped.cholesky() {
                    Some(ch) => ch.solve(&neg_g),
                    None => {
                        // Indefinite normal matrix: damp harder.
                        let next = (lambda * self.config.lambda_up_factor)
                            .min(self.config.max_lambda);
                        if next == lambda {
                            return Err(SpecParamError::Fit(
                                "singular normal equations at maximum damping".to_string(),
                            ));
                        }
                        lambda = next;
                        continue;
                    }
                };

                let step_norm = step.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
                if step_norm < self.config.xtol {
                    return Ok(LmResult {
                        params,
                        residuals,
                        cost,
                        iterations: iteration,
                        func_evals,
                        message: format!(
                            "step convergence: |dx| = {:.2e} < {:.2e}",
                            step_norm, self.config.xtol
                        ),
                    });
                }

                if func_evals + 1 > self.config.max_nfev {
                    return Err(SpecParamError::Fit(format!(
                        "exceeded maximum function evaluations ({})",
                        self.config.max_nfev
                    )));
                }

                let mut candidate = params.clone();
                for k in 0..n_params {
                    candidate[k] += step[k];
                }
                project(&mut candidate, bounds);

                let new_residuals = problem.eval(&candidate)?;
                func_evals += 1;
                let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

                if new_cost.is_finite() && new_cost < cost {
                    let param_change = candidate
                        .iter()
                        .zip(params.iter())
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0f64, f64::max);
                    let cost_change = (cost - new_cost) / cost.max(1e-12);

                    params = candidate;
                    residuals = new_residuals;
                    cost = new_cost;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);

                    if param_change < self.config.xtol {
                        return Ok(LmResult {
                            params,
                            residuals,
                            cost,
                            iterations: iteration + 1,
                            func_evals,
                            message: format!(
                                "parameter convergence: |dx| = {:.2e} < {:.2e}",
                                param_change, self.config.xtol
                            ),
                        });
                    }
                    if cost_change < self.config.ftol {
                        return Ok(LmResult {
                            params,
                            residuals,
                            cost,
                            iterations: iteration + 1,
                            func_evals,
                            message: format!(
                                "cost convergence: |df|/f = {:.2e} < {:.2e}",
                                cost_change, self.config.ftol
                            ),
                        });
                    }
                    break;
                } else {
                    let next = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if next == lambda {
                        return Err(SpecParamError::Fit(
                            "damping saturated without reducing the cost".to_string(),
                        ));
                    }
                    lambda = next;
                }
            }
        }

        Err(SpecParamError::Fit(format!(
            "exceeded maximum iterations ({})",
            self.config.max_iterations
        )))
    }
}

fn project(params: &mut Array1<f64>, bounds: &[(f64, f64)]) {
    for (value, (lo, hi)) in params.iter_mut().zip(bounds.iter()) {
        *value = value.clamp(*lo, *hi);
    }
}
