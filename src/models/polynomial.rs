//! Backgrounds and polynomials.

use crate::error::{FitError, Result};
use crate::function::{Jacobian, Leaf, LeafBody};
use crate::parameters::ParameterSpec;

/// A constant background, f(x) = A0.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatBackground;

impl FlatBackground {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Leaf<FlatBackground> {
        Leaf::new(FlatBackground)
    }
}

impl LeafBody for FlatBackground {
    fn name(&self) -> &str {
        "FlatBackground"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![ParameterSpec::new("A0", 0.0).with_description("Background level")]
    }

    fn function(&self, p: &[f64], _x: &[f64], out: &mut [f64]) -> Result<()> {
        out.fill(p[0]);
        Ok(())
    }

    fn derivative(&self, _p: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        for row in 0..x.len() {
            jac.set(row, 0, 1.0);
        }
        Ok(())
    }

    fn has_derivative(&self) -> bool {
        true
    }
}

/// A straight-line background, f(x) = A0 + A1 * x.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackground;

impl LinearBackground {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Leaf<LinearBackground> {
        Leaf::new(LinearBackground)
    }
}

impl LeafBody for LinearBackground {
    fn name(&self) -> &str {
        "LinearBackground"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("A0", 0.0).with_description("Intercept"),
            ParameterSpec::new("A1", 0.0).with_description("Slope"),
        ]
    }

    fn function(&self, p: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = p[0] + p[1] * xi;
        }
        Ok(())
    }

    fn derivative(&self, _p: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        for (row, &xi) in x.iter().enumerate() {
            jac.set(row, 0, 1.0);
            jac.set(row, 1, xi);
        }
        Ok(())
    }

    fn has_derivative(&self) -> bool {
        true
    }
}

/// A polynomial of degree `n`, f(x) = A0 + A1 * x + ... + An * x^n.
///
/// The degree is the attribute `n`; changing it redeclares the parameters.
#[derive(Debug, Clone, Copy)]
pub struct Polynomial {
    degree: usize,
}

impl Default for Polynomial {
    fn default() -> Self {
        Self { degree: 2 }
    }
}

impl Polynomial {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(degree: usize) -> Leaf<Polynomial> {
        Leaf::new(Polynomial { degree })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }
}

impl LeafBody for Polynomial {
    fn name(&self) -> &str {
        "Polynomial"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        (0..=self.degree)
            .map(|k| ParameterSpec::new(format!("A{}", k), 0.0))
            .collect()
    }

    fn function(&self, p: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        for (o, &xi) in out.iter_mut().zip(x) {
            // Horner
            *o = p.iter().rev().fold(0.0, |acc, &c| acc * xi + c);
        }
        Ok(())
    }

    fn derivative(&self, _p: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        for (row, &xi) in x.iter().enumerate() {
            let mut power = 1.0;
            for k in 0..=self.degree {
                jac.set(row, k, power);
                power *= xi;
            }
        }
        Ok(())
    }

    fn has_derivative(&self) -> bool {
        true
    }

    fn attributes(&self) -> Vec<(String, String)> {
        vec![("n".to_string(), self.degree.to_string())]
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        if name != "n" {
            return Err(FitError::InvalidArgument(format!(
                "Polynomial has no attribute '{}'",
                name
            )));
        }
        self.degree = value.trim().parse().map_err(|_| {
            FitError::InvalidArgument(format!(
                "polynomial degree must be an integer, got '{}'",
                value
            ))
        })?;
        Ok(())
    }
}
