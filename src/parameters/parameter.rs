//! Declared parameter record
//!
//! This module provides the Parameter struct, one named coefficient owned by a
//! leaf function, together with its fit status.

use serde::{Deserialize, Serialize};

/// Whether a declared parameter is part of the active space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterStatus {
    /// Free to vary during a fit.
    #[default]
    Active,
    /// Held at its current value.
    Fixed,
    /// Computed from a tie expression.
    Tied,
}

/// Declaration of a parameter: name, default value and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub default: f64,
    pub description: String,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, default: f64) -> Self {
        Self {
            name: name.into(),
            default,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A declared parameter of a leaf function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    value: f64,
    description: String,
    /// Set by a person rather than by a default or a derived value
    explicit: bool,
    status: ParameterStatus,
}

impl Parameter {
    /// Create an active parameter holding its default value.
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore::parameters::{Parameter, ParameterSpec, ParameterStatus};
    ///
    /// let param = Parameter::from_spec(ParameterSpec::new("Height", 2.0));
    /// assert_eq!(param.name(), "Height");
    /// assert_eq!(param.value(), 2.0);
    /// assert_eq!(param.status(), ParameterStatus::Active);
    /// assert!(!param.is_explicit());
    /// ```
    pub fn from_spec(spec: ParameterSpec) -> Self {
        Self {
            name: spec.name,
            value: spec.default,
            description: spec.description,
            explicit: false,
            status: ParameterStatus::Active,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn status(&self) -> ParameterStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ParameterStatus::Active
    }

    pub(crate) fn set_value(&mut self, value: f64, explicit: bool) {
        self.value = value;
        self.explicit = explicit;
    }

    /// Overwrite the value keeping the explicit flag, used by tie evaluation.
    pub(crate) fn assign(&mut self, value: f64) {
        self.value = value;
    }

    pub(crate) fn set_status(&mut self, status: ParameterStatus) {
        self.status = status;
    }
}
