//! Scalar cost functions over weighted residuals.
//!
//! A [`CostFunction`] turns a residual vector into a single number and gives
//! its derivative with respect to each residual. The optimizer adapter
//! combines that derivative with the residual Jacobian to produce a
//! gradient, so every cost shares the same evaluation of the model tree.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// A scalar cost `C(r) = Σ ρ(rᵢ)`.
pub trait CostFunction: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// ρ of a single residual.
    fn rho(&self, r: f64) -> f64;

    /// dρ/dr of a single residual.
    fn rho_derivative(&self, r: f64) -> f64;

    /// Total cost of `residuals`.
    fn value(&self, residuals: ArrayView1<'_, f64>) -> f64 {
        residuals.iter().map(|&r| self.rho(r)).sum()
    }

    /// dC/drᵢ for every residual.
    fn derivative(&self, residuals: ArrayView1<'_, f64>) -> Array1<f64> {
        residuals.mapv(|r| self.rho_derivative(r))
    }
}

/// Plain sum of squares, ρ(r) = r².
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LeastSquares;

impl CostFunction for LeastSquares {
    fn name(&self) -> &str {
        "Least squares"
    }

    fn rho(&self, r: f64) -> f64 {
        r * r
    }

    fn rho_derivative(&self, r: f64) -> f64 {
        2.0 * r
    }
}

/// Loss functions that grow slower than r² for large residuals, reducing
/// the influence of outliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RobustLoss {
    /// ρ(r) = r² for |r| ≤ δ, 2δ|r| - δ² beyond.
    Huber(f64),

    /// ρ(r) = 2 (sqrt(1 + r²) - 1)
    SoftL1,

    /// ρ(r) = c² ln(1 + (r/c)²)
    Cauchy(f64),

    /// ρ(r) = arctan(r²)
    Arctan,
}

impl RobustLoss {
    pub fn name(&self) -> &'static str {
        match self {
            RobustLoss::Huber(_) => "Huber",
            RobustLoss::SoftL1 => "Soft L1",
            RobustLoss::Cauchy(_) => "Cauchy",
            RobustLoss::Arctan => "Arctan",
        }
    }

    pub fn rho(&self, r: f64) -> f64 {
        match *self {
            RobustLoss::Huber(delta) => {
                let a = r.abs();
                if a <= delta {
                    r * r
                } else {
                    2.0 * delta * a - delta * delta
                }
            }
            RobustLoss::SoftL1 => 2.0 * ((1.0 + r * r).sqrt() - 1.0),
            RobustLoss::Cauchy(c) => c * c * (1.0 + (r / c).powi(2)).ln(),
            RobustLoss::Arctan => (r * r).atan(),
        }
    }

    pub fn rho_derivative(&self, r: f64) -> f64 {
        match *self {
            RobustLoss::Huber(delta) => {
                if r.abs() <= delta {
                    2.0 * r
                } else {
                    2.0 * delta * r.signum()
                }
            }
            RobustLoss::SoftL1 => 2.0 * r / (1.0 + r * r).sqrt(),
            RobustLoss::Cauchy(c) => 2.0 * r / (1.0 + (r / c).powi(2)),
            RobustLoss::Arctan => 2.0 * r / (1.0 + r.powi(4)),
        }
    }
}

/// A cost built from a [`RobustLoss`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Robust(pub RobustLoss);

impl CostFunction for Robust {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn rho(&self, r: f64) -> f64 {
        self.0.rho(r)
    }

    fn rho_derivative(&self, r: f64) -> f64 {
        self.0.rho_derivative(r)
    }
}
