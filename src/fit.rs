//! Fitting entry points.
//!
//! [`fit`] runs the Levenberg-Marquardt solver on one tree and one dataset
//! and leaves the best-fit values in the tree. [`fit_many`] fits independent
//! datasets in parallel, giving every worker its own copy of the tree.

use std::fmt;

use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;

use crate::adapter::{FitData, OptimizerAdapter};
use crate::error::Result;
use crate::function::ModelFunction;
use crate::lm::{LevenbergMarquardt, LmConfig};

/// Outcome of a fit. The tree holds the fitted values as well.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Active parameter values at the solution
    pub active_values: Vec<f64>,

    /// Weighted residuals at the solution
    pub residuals: Array1<f64>,

    /// Half the weighted sum of squared residuals
    pub cost: f64,

    /// Weighted sum of squares divided by the degrees of freedom, or NaN
    /// when there are no degrees of freedom
    pub reduced_chi_squared: f64,

    pub iterations: usize,

    pub func_evals: usize,

    /// Whether the solver met a convergence criterion
    pub success: bool,

    pub message: String,
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Reduced chi-squared: {:.6e}", self.reduced_chi_squared)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Active values: {:?}", self.active_values)?;
        Ok(())
    }
}

/// Fit `function` to `data`, starting from its current active values.
///
/// On return the tree holds the best values found, with ties applied, even
/// when the solver did not converge.
pub fn fit(
    function: &mut dyn ModelFunction,
    data: &FitData,
    config: &LmConfig,
) -> Result<FitResult> {
    let start = Array1::from(function.active_values()?);
    let solver = LevenbergMarquardt::with_config(config.clone());
    let result = {
        let mut adapter = OptimizerAdapter::new(&mut *function, data);
        solver.minimize(&mut adapter, start)?
    };

    function.update_active(&result.params.to_vec())?;

    let n_active = result.params.len();
    let dof = data.len().saturating_sub(n_active);
    let chi_squared = 2.0 * result.cost;
    let reduced_chi_squared = if dof > 0 {
        chi_squared / dof as f64
    } else {
        f64::NAN
    };
    debug!(
        function = function.name(),
        success = result.success,
        cost = result.cost,
        "fit finished"
    );

    Ok(FitResult {
        active_values: result.params.to_vec(),
        residuals: result.residuals,
        cost: result.cost,
        reduced_chi_squared,
        iterations: result.iterations,
        func_evals: result.func_evals,
        success: result.success,
        message: result.message,
    })
}

/// Fit each dataset independently, in parallel.
///
/// Every dataset gets its own copy of `function`; the returned trees hold
/// the fitted values and appear in the order of `datasets`. A failure in one
/// fit does not affect the others.
pub fn fit_many(
    function: &dyn ModelFunction,
    datasets: &[FitData],
    config: &LmConfig,
) -> Vec<Result<(Box<dyn ModelFunction>, FitResult)>> {
    datasets
        .par_iter()
        .map(|data| -> Result<(Box<dyn ModelFunction>, FitResult)> {
            let mut local = function.clone_box();
            let result = fit(local.as_mut(), data, config)?;
            Ok((local, result))
        })
        .collect()
}
