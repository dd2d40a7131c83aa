//! Boundary constraints enforced through penalty terms.
//!
//! A violated bound does not clamp the parameter. Instead it contributes
//! `factor * (value - bound)^2` to every model value and the matching
//! derivative to the parameter's Jacobian column, pushing the solver back
//! inside the allowed interval.

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};

/// Default penalty factor for a new constraint.
pub const DEFAULT_PENALTY_FACTOR: f64 = 1000.0;

/// Lower and/or upper bound on a single declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConstraint {
    lower: Option<f64>,
    upper: Option<f64>,
    penalty_factor: f64,
}

impl BoundaryConstraint {
    /// Create a constraint with optional bounds. At least one bound is required
    /// and `lower` may not exceed `upper`.
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Result<Self> {
        match (lower, upper) {
            (None, None) => Err(FitError::InvalidArgument(
                "a boundary constraint needs at least one bound".to_string(),
            )),
            (Some(l), Some(u)) if l > u => Err(FitError::InvalidArgument(format!(
                "lower bound {} exceeds upper bound {}",
                l, u
            ))),
            _ if lower.map_or(false, f64::is_nan) || upper.map_or(false, f64::is_nan) => Err(
                FitError::InvalidArgument("bounds must not be NaN".to_string()),
            ),
            _ => Ok(Self {
                lower,
                upper,
                penalty_factor: DEFAULT_PENALTY_FACTOR,
            }),
        }
    }

    pub fn lower_bound(lower: f64) -> Result<Self> {
        Self::new(Some(lower), None)
    }

    pub fn upper_bound(upper: f64) -> Result<Self> {
        Self::new(None, Some(upper))
    }

    pub fn bounded(lower: f64, upper: f64) -> Result<Self> {
        Self::new(Some(lower), Some(upper))
    }

    pub fn with_penalty_factor(mut self, factor: f64) -> Result<Self> {
        if !(factor > 0.0) || !factor.is_finite() {
            return Err(FitError::InvalidArgument(format!(
                "penalty factor must be positive and finite, got {}",
                factor
            )));
        }
        self.penalty_factor = factor;
        Ok(self)
    }

    pub fn lower(&self) -> Option<f64> {
        self.lower
    }

    pub fn upper(&self) -> Option<f64> {
        self.upper
    }

    pub fn penalty_factor(&self) -> f64 {
        self.penalty_factor
    }

    /// Distance past the violated bound, signed like `value - bound`.
    fn violation(&self, value: f64) -> Option<f64> {
        match (self.lower, self.upper) {
            (Some(lower), _) if value < lower => Some(value - lower),
            (_, Some(upper)) if value > upper => Some(value - upper),
            _ => None,
        }
    }

    /// Penalty for the current value; zero inside the bounds.
    pub fn penalty(&self, value: f64) -> f64 {
        self.violation(value)
            .map_or(0.0, |dp| self.penalty_factor * dp * dp)
    }

    /// Derivative of [`penalty`](Self::penalty) with respect to the parameter.
    pub fn penalty_derivative(&self, value: f64) -> f64 {
        self.violation(value)
            .map_or(0.0, |dp| 2.0 * self.penalty_factor * dp)
    }

    /// Closest value that satisfies the constraint.
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.lower.map_or(value, |lower| value.max(lower));
        self.upper.map_or(value, |upper| value.min(upper))
    }

    /// Text form `lower<name<upper`, `lower<name` or `name<upper`. A
    /// non-default penalty factor follows as `,name.penalty=factor`.
    pub fn format(&self, name: &str) -> String {
        let bounds = match (self.lower, self.upper) {
            (Some(l), Some(u)) => format!("{}<{}<{}", l, name, u),
            (Some(l), None) => format!("{}<{}", l, name),
            (None, Some(u)) => format!("{}<{}", name, u),
            (None, None) => name.to_string(),
        };
        if self.penalty_factor == DEFAULT_PENALTY_FACTOR {
            bounds
        } else {
            format!("{},{}.penalty={}", bounds, name, self.penalty_factor)
        }
    }

    /// Parse a `name.penalty=factor` item, returning the parameter name and
    /// the factor.
    pub fn parse_penalty(text: &str) -> Result<(String, f64)> {
        let malformed = || FitError::Parse(format!("malformed penalty factor '{}'", text));
        let (key, value) = text.split_once('=').ok_or_else(malformed)?;
        let name = key.trim().strip_suffix(".penalty").ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let factor = value.trim().parse::<f64>().map_err(|_| malformed())?;
        Ok((name.to_string(), factor))
    }

    /// Parse the text form produced by [`format`](Self::format), returning the
    /// parameter name and the constraint.
    pub fn parse(text: &str) -> Result<(String, Self)> {
        let parts: Vec<&str> = text.split('<').map(str::trim).collect();
        let number = |s: &str| {
            s.parse::<f64>().map_err(|_| {
                FitError::Parse(format!("invalid bound '{}' in constraint '{}'", s, text))
            })
        };
        match parts.as_slice() {
            [lower, name, upper] => Ok((
                name.to_string(),
                Self::bounded(number(lower)?, number(upper)?)?,
            )),
            [left, right] => match left.parse::<f64>() {
                Ok(lower) => Ok((right.to_string(), Self::lower_bound(lower)?)),
                Err(_) => Ok((left.to_string(), Self::upper_bound(number(right)?)?)),
            },
            _ => Err(FitError::Parse(format!("malformed constraint '{}'", text))),
        }
    }
}
