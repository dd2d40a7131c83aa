//! Configuration options for the Levenberg-Marquardt algorithm.
//!
//! Convergence tolerances and the damping schedule. A configuration can be
//! loaded from JSON; missing fields take their default values.

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// Configuration options for the Levenberg-Marquardt algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum number of iterations. Default: 100
    pub max_iterations: usize,

    /// Relative tolerance for the reduction of the cost. Default: 1e-8
    pub ftol: f64,

    /// Relative tolerance for the change in parameter values. Default: 1e-8
    pub xtol: f64,

    /// Tolerance for the largest gradient component. Default: 1e-8
    pub gtol: f64,

    /// Initial value for the damping parameter. Default: 1e-3
    pub initial_lambda: f64,

    /// Factor by which to increase lambda after a rejected step. Default: 10.0
    pub lambda_up_factor: f64,

    /// Factor by which to decrease lambda after an accepted step. Default: 0.1
    pub lambda_down_factor: f64,

    /// Minimum value for lambda. Default: 1e-10
    pub min_lambda: f64,

    /// Maximum value for lambda. Default: 1e10
    pub max_lambda: f64,

    /// Whether to return the Jacobian at the solution. Default: false
    pub calc_jacobian: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            initial_lambda: 1e-3,
            lambda_up_factor: 10.0,
            lambda_down_factor: 0.1,
            min_lambda: 1e-10,
            max_lambda: 1e10,
            calc_jacobian: false,
        }
    }
}

impl LmConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that tolerances are non-negative and the damping schedule is
    /// usable.
    pub fn validate(&self) -> Result<()> {
        if self.ftol < 0.0 || self.xtol < 0.0 || self.gtol < 0.0 {
            return Err(FitError::InvalidArgument(
                "tolerances must be non-negative".to_string(),
            ));
        }
        if !(self.min_lambda > 0.0
            && self.min_lambda <= self.initial_lambda
            && self.initial_lambda <= self.max_lambda)
        {
            return Err(FitError::InvalidArgument(format!(
                "initial_lambda {} must lie in [{}, {}] with a positive minimum",
                self.initial_lambda, self.min_lambda, self.max_lambda
            )));
        }
        if self.lambda_up_factor <= 1.0
            || !(self.lambda_down_factor > 0.0 && self.lambda_down_factor < 1.0)
        {
            return Err(FitError::InvalidArgument(
                "lambda_up_factor must exceed 1 and lambda_down_factor lie in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}
