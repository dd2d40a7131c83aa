//! Problem definition trait.
//!
//! A [`Problem`] is a nonlinear least-squares problem in the form the
//! Levenberg-Marquardt solver consumes: a residual vector and its Jacobian
//! as functions of a flat parameter vector.

use ndarray::{Array1, Array2};

use crate::error::Result;

/// A nonlinear least-squares problem.
///
/// Evaluation takes `&mut self` so implementations may move state (such as
/// the parameters of a model tree) to the requested point.
pub trait Problem {
    /// Number of free parameters.
    fn parameter_count(&self) -> usize;

    /// Number of residuals.
    fn residual_count(&self) -> usize;

    /// Evaluate the residuals at `params`.
    fn eval(&mut self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Evaluate the Jacobian of the residuals at `params`, one row per
    /// residual and one column per parameter.
    fn jacobian(&mut self, params: &Array1<f64>) -> Result<Array2<f64>>;

    /// Cost of a residual vector. The default is half the sum of squares.
    fn cost(&self, residuals: &Array1<f64>) -> f64 {
        0.5 * residuals.iter().map(|r| r * r).sum::<f64>()
    }

    /// Evaluate the cost at `params`.
    fn eval_cost(&mut self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(self.cost(&residuals))
    }
}
