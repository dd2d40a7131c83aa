//! Leaf functions defined by closures.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{FitError, Result};
use crate::function::{Jacobian, Leaf, LeafBody};
use crate::parameters::ParameterSpec;

type ValueFn = dyn Fn(&[f64], &[f64], &mut [f64]) -> Result<()> + Send + Sync;
type DerivativeFn = dyn Fn(&[f64], &[f64], &mut dyn Jacobian) -> Result<()> + Send + Sync;

/// A leaf body backed by closures.
///
/// Closures receive the declared parameter values in declaration order,
/// followed by the inputs and the output.
///
/// # Examples
///
/// ```
/// use fitcore::function::{ModelFunction, UserFunction};
///
/// let line = UserFunction::new("Line", |p: &[f64], x: &[f64], out: &mut [f64]| {
///     for (o, &xi) in out.iter_mut().zip(x) {
///         *o = p[0] * xi + p[1];
///     }
///     Ok(())
/// })
/// .with_parameter("Slope", 2.0)
/// .with_parameter("Intercept", 1.0)
/// .build()
/// .unwrap();
///
/// let mut out = [0.0; 2];
/// line.evaluate(&[0.0, 1.0], &mut out).unwrap();
/// assert_eq!(out, [1.0, 3.0]);
/// ```
#[derive(Clone)]
pub struct UserFunction {
    name: String,
    parameters: Vec<ParameterSpec>,
    function: Arc<ValueFn>,
    derivative: Option<Arc<DerivativeFn>>,
}

impl UserFunction {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            function: Arc::new(function),
            derivative: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, default: f64) -> Self {
        self.parameters.push(ParameterSpec::new(name, default));
        self
    }

    pub fn with_described_parameter(
        mut self,
        name: impl Into<String>,
        default: f64,
        description: impl Into<String>,
    ) -> Self {
        self.parameters
            .push(ParameterSpec::new(name, default).with_description(description));
        self
    }

    /// Provide an analytic derivative.
    pub fn with_derivative<D>(mut self, derivative: D) -> Self
    where
        D: Fn(&[f64], &[f64], &mut dyn Jacobian) -> Result<()> + Send + Sync + 'static,
    {
        self.derivative = Some(Arc::new(derivative));
        self
    }

    /// Wrap the body in a [`Leaf`]. Parameter names must be unique.
    pub fn build(self) -> Result<Leaf<UserFunction>> {
        let mut seen = HashSet::new();
        if let Some(dup) = self.parameters.iter().find(|p| !seen.insert(p.name.as_str())) {
            return Err(FitError::InvalidArgument(format!(
                "parameter '{}' is declared twice in {}",
                dup.name, self.name
            )));
        }
        Ok(Leaf::new(self))
    }
}

impl fmt::Debug for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserFunction")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("has_derivative", &self.derivative.is_some())
            .finish()
    }
}

impl LeafBody for UserFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        self.parameters.clone()
    }

    fn function(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        (self.function)(params, x, out)
    }

    fn derivative(&self, params: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        match &self.derivative {
            Some(derivative) => derivative(params, x, jac),
            None => Err(FitError::NotImplemented(format!(
                "{} has no analytic derivative",
                self.name
            ))),
        }
    }

    fn has_derivative(&self) -> bool {
        self.derivative.is_some()
    }
}
