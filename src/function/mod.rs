//! # Model Functions
//!
//! A model is a tree of [`ModelFunction`]s. Leaves own named parameters and
//! compute values; a [`CompositeFunction`] owns an ordered list of children
//! and presents the sum of their outputs as a single function over the union
//! of their parameters.
//!
//! Every function exposes two index spaces:
//!
//! - the **declared** space, one index per named parameter, and
//! - the **active** space, the declared parameters that are neither fixed nor
//!   tied. This is the only space a solver ever sees.
//!
//! Active indices always follow declared order. For a composite, parameter
//! `i` of child `k` has declared index `declared_offset(k) + i`, and names are
//! namespaced as `f<k>.<name>`.
//!
//! ## Example
//!
//! ```rust
//! use fitcore::function::{CompositeFunction, ModelFunction};
//! use fitcore::models::{FlatBackground, Gaussian};
//!
//! let mut model = CompositeFunction::new();
//! model.add_child(Gaussian::new()).unwrap();
//! model.add_child(FlatBackground::new()).unwrap();
//!
//! model.set_parameter_by_name("f0.Height", 10.0).unwrap();
//! model.tie("f1.A0", "0.1*f0.Height").unwrap();
//!
//! assert_eq!(model.n_params(), 4);
//! assert_eq!(model.n_active(), 3);
//! assert_eq!(model.parameter_by_name("f1.A0").unwrap(), 1.0);
//! ```

use std::fmt;

use tracing::warn;

use crate::error::{FitError, Result};
use crate::parameters::{
    BoundaryConstraint, FunctionId, ParameterReference, ParameterSpec, ParameterValues, Tie,
};

pub mod composite;
pub mod index_table;
pub mod jacobian;
pub mod leaf;
pub mod numeric;
pub mod parser;
pub mod user;

pub use composite::CompositeFunction;
pub use index_table::ParameterIndexTable;
pub use jacobian::{Jacobian, JacobianBuffer, PartialJacobian};
pub use leaf::{Leaf, LeafBody};
pub use numeric::NumericalDifferentiator;
pub use parser::FunctionFactory;
pub use user::UserFunction;

/// A fittable function of one independent variable.
///
/// Indices passed to the `*parameter*` methods are declared indices unless the
/// method name says `active`. Out-of-range indices fail with
/// [`FitError::IndexOutOfRange`].
pub trait ModelFunction: fmt::Debug + Send + Sync {
    /// Stable identity used by [`ParameterReference`].
    fn id(&self) -> FunctionId;

    fn name(&self) -> &str;

    /// Number of declared parameters.
    fn n_params(&self) -> usize;

    fn parameter(&self, i: usize) -> Result<f64>;

    /// Set a declared parameter. `explicit` records whether a person chose
    /// the value, as opposed to a default or derived one.
    fn set_parameter(&mut self, i: usize, value: f64, explicit: bool) -> Result<()>;

    fn parameter_name(&self, i: usize) -> Result<String>;

    fn parameter_description(&self, i: usize) -> Result<String>;

    /// Declared index of a parameter given its (possibly namespaced) name.
    fn parameter_index_of(&self, name: &str) -> Result<usize>;

    fn is_explicitly_set(&self, i: usize) -> Result<bool>;

    /// Add a parameter. Composites never own parameters and reject this.
    fn declare_parameter(&mut self, spec: ParameterSpec) -> Result<usize>;

    /// Number of active parameters.
    fn n_active(&self) -> usize;

    fn active_parameter(&self, a: usize) -> Result<f64> {
        let i = self.index_of_active(a)?;
        self.parameter(i)
    }

    /// Set an active parameter. The explicit flag of the parameter is kept.
    fn set_active_parameter(&mut self, a: usize, value: f64) -> Result<()>;

    /// Declared index of active parameter `a`.
    fn index_of_active(&self, a: usize) -> Result<usize>;

    /// Active index of declared parameter `i`, or `None` if it is fixed or
    /// tied.
    fn active_index(&self, i: usize) -> Result<Option<usize>>;

    fn is_active(&self, i: usize) -> Result<bool> {
        Ok(self.active_index(i)?.is_some())
    }

    fn is_fixed(&self, i: usize) -> Result<bool>;

    /// Fix declared parameter `i`, removing it from the active space.
    fn remove_active(&mut self, i: usize) -> Result<()>;

    /// Return declared parameter `i` to the active space, dropping any tie.
    fn restore_active(&mut self, i: usize) -> Result<()>;

    /// Write every active parameter without applying ties.
    fn set_active_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.n_active() {
            return Err(FitError::DimensionMismatch(format!(
                "expected {} active values, got {}",
                self.n_active(),
                values.len()
            )));
        }
        for (a, &value) in values.iter().enumerate() {
            self.set_active_parameter(a, value)?;
        }
        Ok(())
    }

    /// Write every active parameter, then run one tie pass.
    fn update_active(&mut self, values: &[f64]) -> Result<()> {
        self.set_active_values(values)?;
        self.apply_ties()
    }

    fn active_values(&self) -> Result<Vec<f64>> {
        (0..self.n_active())
            .map(|a| self.active_parameter(a))
            .collect()
    }

    /// Evaluate at `x` into `out`, which must have the same length.
    fn evaluate(&self, x: &[f64], out: &mut [f64]) -> Result<()>;

    /// Analytic derivatives by declared index. Leaves without one return
    /// [`FitError::NotImplemented`].
    fn evaluate_derivative(&mut self, x: &[f64], jac: &mut dyn Jacobian) -> Result<()>;

    /// Whether [`evaluate_derivative`](Self::evaluate_derivative) is expected
    /// to succeed.
    fn has_analytic_derivative(&self) -> bool;

    /// Derivatives by declared index, falling back to forward differences
    /// when the analytic derivative is missing or fails.
    fn derive(&mut self, x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        if self.has_analytic_derivative() {
            match self.evaluate_derivative(x, jac) {
                Ok(()) => return Ok(()),
                Err(err) => warn!(
                    function = self.name(),
                    error = %err,
                    "analytic derivative failed, using numerical differentiation"
                ),
            }
        }
        NumericalDifferentiator::derive(self, x, jac)
    }

    /// Add the declared values of every function in this tree to `values`.
    fn collect_values(&self, values: &mut ParameterValues);

    /// Recompute every tied parameter in this tree from `values`.
    fn apply_ties_with(&mut self, values: &ParameterValues) -> Result<()>;

    /// Recompute every tied parameter from a snapshot of this tree.
    ///
    /// This is a single pass: a tie reading another tied parameter sees the
    /// value that parameter had before the call.
    fn apply_ties(&mut self) -> Result<()> {
        let mut values = ParameterValues::new();
        self.collect_values(&mut values);
        self.apply_ties_with(&values)
    }

    /// Add a tie whose target and every referenced parameter lie in this
    /// tree; anything else is a [`FitError::LogicError`].
    fn add_tie(&mut self, tie: Tie) -> Result<()> {
        if let Some(missing) = tie
            .references()
            .find(|reference| self.parameter_index(reference).is_none())
        {
            return Err(FitError::LogicError(format!(
                "tie references parameter {} which is not part of this function",
                missing
            )));
        }
        self.attach_tie(tie)
    }

    /// Route a tie to the leaf owning its target without checking what the
    /// expression reads.
    fn attach_tie(&mut self, tie: Tie) -> Result<()>;

    /// Remove the tie on declared parameter `i`, returning whether there was
    /// one. The parameter becomes active again.
    fn remove_tie(&mut self, i: usize) -> Result<bool>;

    fn tie_of(&self, i: usize) -> Result<Option<&Tie>>;

    fn clear_ties(&mut self);

    /// Declared index of `reference` in this tree, or `None` if it belongs
    /// to a function outside it.
    fn parameter_index(&self, reference: &ParameterReference) -> Option<usize>;

    fn parameter_reference(&self, i: usize) -> Result<ParameterReference>;

    /// Ids of this function and all of its descendants.
    fn function_ids(&self, ids: &mut Vec<FunctionId>);

    fn add_constraint(&mut self, i: usize, constraint: BoundaryConstraint) -> Result<()>;

    fn remove_constraint(&mut self, i: usize) -> Result<bool>;

    fn constraint_of(&self, i: usize) -> Result<Option<&BoundaryConstraint>>;

    /// Every constraint in this tree keyed by declared index. Each call
    /// starts from the beginning.
    fn constraints(&self) -> Box<dyn Iterator<Item = (usize, BoundaryConstraint)> + '_>;

    /// Sum of constraint penalties over active parameters.
    fn penalty(&self) -> f64;

    /// Add the penalty derivatives to the active columns of `jac`.
    fn add_penalty_derivative(&self, jac: &mut dyn Jacobian) -> Result<()>;

    /// Text form accepted by [`FunctionFactory::parse`].
    fn as_string(&self) -> String;

    fn is_composite(&self) -> bool {
        false
    }

    /// Names and current values of the function's attributes.
    fn attributes(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn set_attribute(&mut self, name: &str, _value: &str) -> Result<()> {
        Err(FitError::InvalidArgument(format!(
            "{} has no attribute '{}'",
            self.name(),
            name
        )))
    }

    /// Deep copy. The copy keeps every [`FunctionId`], so references into
    /// the original resolve against the copy as well.
    fn clone_box(&self) -> Box<dyn ModelFunction>;

    fn parameter_by_name(&self, name: &str) -> Result<f64> {
        let i = self.parameter_index_of(name)?;
        self.parameter(i)
    }

    fn set_parameter_by_name(&mut self, name: &str, value: f64) -> Result<()> {
        let i = self.parameter_index_of(name)?;
        self.set_parameter(i, value, true)
    }

    /// Set a value unless one was set explicitly already.
    fn set_parameter_default(&mut self, i: usize, value: f64) -> Result<()> {
        if self.is_explicitly_set(i)? {
            return Ok(());
        }
        self.set_parameter(i, value, false)
    }

    /// Tie parameter `name` to `expression`, whose variables are parameter
    /// names relative to this function. A constant expression fixes the
    /// parameter at that value instead.
    fn tie(&mut self, name: &str, expression: &str) -> Result<()> {
        let i = self.parameter_index_of(name)?;
        let target = self.parameter_reference(i)?;
        let tie = Tie::parse(target, expression, |var| {
            let j = self.parameter_index_of(var)?;
            self.parameter_reference(j)
        })?;
        if tie.is_constant() {
            if let Some(value) = tie.evaluate(&ParameterValues::new())? {
                self.set_parameter(i, value, true)?;
            }
            self.remove_tie(i)?;
            return self.remove_active(i);
        }
        self.add_tie(tie)?;
        self.apply_ties()
    }

    /// Remove the tie on parameter `name`.
    fn untie(&mut self, name: &str) -> Result<bool> {
        let i = self.parameter_index_of(name)?;
        self.remove_tie(i)
    }

    fn fix(&mut self, name: &str) -> Result<()> {
        let i = self.parameter_index_of(name)?;
        self.remove_active(i)
    }

    fn unfix(&mut self, name: &str) -> Result<()> {
        let i = self.parameter_index_of(name)?;
        self.restore_active(i)
    }
}

impl Clone for Box<dyn ModelFunction> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
