//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! Each iteration solves the damped normal equations
//!
//! (JᵀJ + λ diag(JᵀJ)) δ = -Jᵀr
//!
//! by Cholesky factorization. A step that lowers the cost is accepted and λ
//! shrinks; otherwise λ grows and the step is recomputed from the same
//! Jacobian.

use ndarray::{Array1, Array2};
use std::fmt;
use tracing::{info, trace};

use crate::error::{FitError, Result};
use crate::problem::Problem;

use super::config::LmConfig;

/// Diagonal entries of JᵀJ below this are replaced by it when damping, so a
/// parameter the residuals do not depend on still gets a finite step.
const MIN_DIAGONAL: f64 = 1e-12;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Cost at the solution, as defined by [`Problem::cost`]
    pub cost: f64,

    /// Number of iterations performed
    pub iterations: usize,

    /// Number of residual evaluations
    pub func_evals: usize,

    /// Whether a convergence criterion was met
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new optimizer with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the relative tolerance for the cost reduction.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the relative tolerance for the parameter change.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for the gradient.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Return the Jacobian at the solution in [`LmResult::jacobian`].
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    /// Minimize the cost of `problem` starting from `initial`.
    ///
    /// Failure to converge is reported through [`LmResult::success`]; an
    /// `Err` means the problem itself failed to evaluate.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &mut P,
        initial: Array1<f64>,
    ) -> Result<LmResult> {
        self.config.validate()?;
        let n = problem.parameter_count();
        if initial.len() != n {
            return Err(FitError::DimensionMismatch(format!(
                "expected {} initial parameters, got {}",
                n,
                initial.len()
            )));
        }

        let mut params = initial;
        let mut residuals = problem.eval(&params)?;
        let mut cost = problem.cost(&residuals);
        let mut func_evals = 1;
        let mut lambda = self.config.initial_lambda;

        let outcome = |params, residuals, cost, iterations, func_evals, success, message: &str| {
            LmResult {
                params,
                residuals,
                cost,
                iterations,
                func_evals,
                success,
                message: message.to_string(),
                jacobian: None,
            }
        };

        if n == 0 {
            let result = outcome(
                params,
                residuals,
                cost,
                0,
                func_evals,
                true,
                "No free parameters",
            );
            return self.finish(problem, result);
        }

        for iteration in 0..self.config.max_iterations {
            let jac = problem.jacobian(&params)?;
            let gradient = jac.t().dot(&residuals);
            let gradient_norm = gradient.iter().fold(0.0f64, |m, g| m.max(g.abs()));
            trace!(iteration, cost, lambda, gradient_norm, "levenberg-marquardt iteration");

            if gradient_norm <= self.config.gtol {
                let result = outcome(
                    params,
                    residuals,
                    cost,
                    iteration,
                    func_evals,
                    true,
                    "Gradient below tolerance",
                );
                return self.finish(problem, result);
            }

            let normal = jac.t().dot(&jac);
            loop {
                let mut damped = normal.clone();
                for i in 0..n {
                    damped[[i, i]] += lambda * normal[[i, i]].max(MIN_DIAGONAL);
                }

                let step = match cholesky_solve(&damped, &gradient) {
                    Some(step) => -step,
                    None => {
                        lambda *= self.config.lambda_up_factor;
                        if lambda > self.config.max_lambda {
                            let result = outcome(
                                params,
                                residuals,
                                cost,
                                iteration + 1,
                                func_evals,
                                false,
                                "Normal equations singular, and lambda reached maximum",
                            );
                            return self.finish(problem, result);
                        }
                        continue;
                    }
                };

                let trial = &params + &step;
                let trial_residuals = problem.eval(&trial)?;
                let trial_cost = problem.cost(&trial_residuals);
                func_evals += 1;

                let step_norm = step.dot(&step).sqrt();
                let small_step = |x: &Array1<f64>| {
                    step_norm <= self.config.xtol * (x.dot(x).sqrt() + self.config.xtol)
                };

                if trial_cost.is_finite() && trial_cost < cost {
                    let reduction = cost - trial_cost;
                    let message = if reduction <= self.config.ftol * cost {
                        Some("Relative reduction in cost below tolerance")
                    } else if small_step(&trial) {
                        Some("Relative change in parameters below tolerance")
                    } else {
                        None
                    };

                    params = trial;
                    residuals = trial_residuals;
                    cost = trial_cost;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);

                    if let Some(message) = message {
                        let result = outcome(
                            params,
                            residuals,
                            cost,
                            iteration + 1,
                            func_evals,
                            true,
                            message,
                        );
                        return self.finish(problem, result);
                    }
                    break;
                }

                // rejected steps shrink as lambda grows; stop once they no
                // longer move the parameters
                if small_step(&params) {
                    let result = outcome(
                        params,
                        residuals,
                        cost,
                        iteration + 1,
                        func_evals,
                        true,
                        "Relative change in parameters below tolerance",
                    );
                    return self.finish(problem, result);
                }

                lambda *= self.config.lambda_up_factor;
                if lambda > self.config.max_lambda {
                    let result = outcome(
                        params,
                        residuals,
                        cost,
                        iteration + 1,
                        func_evals,
                        false,
                        "Failed to decrease cost, and lambda reached maximum",
                    );
                    return self.finish(problem, result);
                }
            }
        }

        let result = outcome(
            params,
            residuals,
            cost,
            self.config.max_iterations,
            func_evals,
            false,
            "Maximum number of iterations reached",
        );
        self.finish(problem, result)
    }

    fn finish<P: Problem + ?Sized>(
        &self,
        problem: &mut P,
        mut result: LmResult,
    ) -> Result<LmResult> {
        if self.config.calc_jacobian {
            result.jacobian = Some(problem.jacobian(&result.params)?);
        }
        info!(
            success = result.success,
            iterations = result.iterations,
            func_evals = result.func_evals,
            cost = result.cost,
            "{}",
            result.message
        );
        Ok(result)
    }
}

/// Solve `a x = b` for symmetric positive definite `a`, or `None` if the
/// factorization breaks down.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = a.clone();

    for k in 0..n {
        for j in 0..k {
            l[[k, k]] -= l[[k, j]] * l[[k, j]];
        }
        let diagonal = l[[k, k]];
        if diagonal.is_nan() || diagonal <= 0.0 || diagonal.is_infinite() {
            return None;
        }
        let lkk = diagonal.sqrt();
        l[[k, k]] = lkk;
        for i in k + 1..n {
            for j in 0..k {
                l[[i, k]] -= l[[i, j]] * l[[k, j]];
            }
            l[[i, k]] /= lkk;
        }
    }

    // L y = b
    let mut y = b.clone();
    for i in 0..n {
        for j in 0..i {
            y[i] -= l[[i, j]] * y[j];
        }
        y[i] /= l[[i, i]];
    }

    // Lᵀ x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = y[i];
        for j in i + 1..n {
            x[i] -= l[[j, i]] * x[j];
        }
        x[i] /= l[[i, i]];
    }
    Some(x)
}
