//! The bridge between a function tree and a solver.
//!
//! A solver sees a flat vector of active parameter values. The
//! [`OptimizerAdapter`] pushes that vector into the tree, evaluates, and
//! hands back weighted residuals, their Jacobian, or a scalar cost with its
//! gradient. Weighting and penalty terms are applied here and nowhere else.

use ndarray::{Array1, Array2};

use crate::cost::{CostFunction, LeastSquares};
use crate::error::{FitError, Result};
use crate::function::{JacobianBuffer, ModelFunction};
use crate::problem::Problem;

/// Observed data with per-point weights.
///
/// Weights are stored as their square roots, the factor each residual is
/// multiplied by.
#[derive(Debug, Clone, PartialEq)]
pub struct FitData {
    x: Vec<f64>,
    y: Vec<f64>,
    sqrt_weights: Vec<f64>,
}

impl FitData {
    /// Unweighted data.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(FitError::DimensionMismatch(format!(
                "x has {} points but y has {}",
                x.len(),
                y.len()
            )));
        }
        let sqrt_weights = vec![1.0; x.len()];
        Ok(Self { x, y, sqrt_weights })
    }

    /// Replace the weights. Weights must be finite and non-negative.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self> {
        self.check_len(weights.len())?;
        if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
            return Err(FitError::InvalidArgument(format!(
                "weights must be finite and non-negative, got {}",
                w
            )));
        }
        self.sqrt_weights = weights.iter().map(|w| w.sqrt()).collect();
        Ok(self)
    }

    /// Weight every point by `1 / error²`. Errors must be positive.
    pub fn with_errors(mut self, errors: Vec<f64>) -> Result<Self> {
        self.check_len(errors.len())?;
        if let Some(e) = errors.iter().find(|e| !(e.is_finite() && **e > 0.0)) {
            return Err(FitError::InvalidArgument(format!(
                "errors must be finite and positive, got {}",
                e
            )));
        }
        self.sqrt_weights = errors.iter().map(|e| 1.0 / e).collect();
        Ok(self)
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn sqrt_weights(&self) -> &[f64] {
        &self.sqrt_weights
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len == self.x.len() {
            Ok(())
        } else {
            Err(FitError::DimensionMismatch(format!(
                "expected {} values, got {}",
                self.x.len(),
                len
            )))
        }
    }
}

/// Presents a function tree and a dataset to a solver.
///
/// The adapter borrows the tree mutably for its whole lifetime; every
/// evaluation leaves the tree at the requested active values with ties
/// applied.
#[derive(Debug)]
pub struct OptimizerAdapter<'f> {
    function: &'f mut dyn ModelFunction,
    data: &'f FitData,
    cost: Box<dyn CostFunction>,
}

impl<'f> OptimizerAdapter<'f> {
    /// An adapter using the sum of squares as its scalar cost.
    pub fn new(function: &'f mut dyn ModelFunction, data: &'f FitData) -> Self {
        Self {
            function,
            data,
            cost: Box::new(LeastSquares),
        }
    }

    /// Replace the cost used by [`scalar_cost`](Self::scalar_cost) and
    /// [`scalar_cost_gradient`](Self::scalar_cost_gradient).
    pub fn with_cost(mut self, cost: Box<dyn CostFunction>) -> Self {
        self.cost = cost;
        self
    }

    pub fn function(&self) -> &dyn ModelFunction {
        &*self.function
    }

    pub fn cost_function(&self) -> &dyn CostFunction {
        self.cost.as_ref()
    }

    pub fn n_active(&self) -> usize {
        self.function.n_active()
    }

    pub fn n_points(&self) -> usize {
        self.data.len()
    }

    /// Current active values of the tree.
    pub fn active_values(&self) -> Result<Array1<f64>> {
        Ok(Array1::from(self.function.active_values()?))
    }

    /// `(f(x) + penalty - y) * sqrt(w)` at `active`.
    pub fn residual(&mut self, active: &[f64]) -> Result<Array1<f64>> {
        if self.data.is_empty() {
            return Ok(Array1::zeros(0));
        }
        self.function.update_active(active)?;
        self.current_residual()
    }

    /// Jacobian of [`residual`](Self::residual) by active index.
    pub fn residual_jacobian(&mut self, active: &[f64]) -> Result<Array2<f64>> {
        if self.data.is_empty() {
            return Ok(Array2::zeros((0, self.function.n_active())));
        }
        self.function.update_active(active)?;
        self.current_jacobian()
    }

    /// The configured cost of the residuals at `active`.
    pub fn scalar_cost(&mut self, active: &[f64]) -> Result<f64> {
        if self.data.is_empty() {
            return Ok(0.0);
        }
        let residual = self.residual(active)?;
        Ok(self.cost.value(residual.view()))
    }

    /// Gradient of [`scalar_cost`](Self::scalar_cost), `Jᵀ ρ'(r)`.
    pub fn scalar_cost_gradient(&mut self, active: &[f64]) -> Result<Array1<f64>> {
        if self.data.is_empty() {
            return Ok(Array1::zeros(self.function.n_active()));
        }
        self.function.update_active(active)?;
        let residual = self.current_residual()?;
        let jac = self.current_jacobian()?;
        Ok(jac.t().dot(&self.cost.derivative(residual.view())))
    }

    fn current_residual(&self) -> Result<Array1<f64>> {
        let mut values = vec![0.0; self.data.len()];
        self.function.evaluate(self.data.x(), &mut values)?;
        let penalty = self.function.penalty();
        Ok(values
            .iter()
            .zip(self.data.y())
            .zip(self.data.sqrt_weights())
            .map(|((&f, &y), &w)| (f + penalty - y) * w)
            .collect())
    }

    fn current_jacobian(&mut self) -> Result<Array2<f64>> {
        let n = self.data.len();
        let mut jac = JacobianBuffer::active(n, &*self.function)?;
        self.function.derive(self.data.x(), &mut jac)?;
        self.function.add_penalty_derivative(&mut jac)?;
        let mut matrix = jac.into_matrix();
        for (mut row, &w) in matrix.rows_mut().into_iter().zip(self.data.sqrt_weights()) {
            row *= w;
        }
        Ok(matrix)
    }
}

impl Problem for OptimizerAdapter<'_> {
    fn parameter_count(&self) -> usize {
        self.n_active()
    }

    fn residual_count(&self) -> usize {
        self.n_points()
    }

    fn eval(&mut self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.residual(&params.to_vec())
    }

    fn jacobian(&mut self, params: &Array1<f64>) -> Result<Array2<f64>> {
        self.residual_jacobian(&params.to_vec())
    }
}
