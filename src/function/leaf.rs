//! Leaf functions: a parameter store plus a body that computes values.

use std::fmt;

use tracing::debug;

use crate::error::{check_index, FitError, IndexKind, Result};
use crate::function::{Jacobian, ModelFunction};
use crate::parameters::{
    BoundaryConstraint, FunctionId, ParameterReference, ParameterSpec, ParameterStatus,
    ParameterStore, ParameterValues, Tie,
};

/// The shape of a leaf function.
///
/// A body sees the declared values of its own parameters, in declaration
/// order, and nothing else. Fitting state (fixed, tied, constrained) lives in
/// the surrounding [`Leaf`].
pub trait LeafBody: fmt::Debug + Clone + Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Parameters declared by this body.
    fn parameters(&self) -> Vec<ParameterSpec>;

    /// Values at `x` into `out`, both of the same length.
    fn function(&self, params: &[f64], x: &[f64], out: &mut [f64]) -> Result<()>;

    /// Derivatives with respect to each declared parameter, written with
    /// [`Jacobian::set`].
    fn derivative(&self, _params: &[f64], _x: &[f64], _jac: &mut dyn Jacobian) -> Result<()> {
        Err(FitError::NotImplemented(format!(
            "{} has no analytic derivative",
            self.name()
        )))
    }

    fn has_derivative(&self) -> bool {
        false
    }

    fn attributes(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Change an attribute. The declared parameters may change with it.
    fn set_attribute(&mut self, name: &str, _value: &str) -> Result<()> {
        Err(FitError::InvalidArgument(format!(
            "{} has no attribute '{}'",
            self.name(),
            name
        )))
    }
}

/// A [`ModelFunction`] owning its own parameters.
#[derive(Debug, Clone)]
pub struct Leaf<B: LeafBody> {
    id: FunctionId,
    store: ParameterStore,
    body: B,
}

impl<B: LeafBody> Leaf<B> {
    pub fn new(body: B) -> Self {
        Self {
            id: FunctionId::next(),
            store: ParameterStore::from_specs(body.parameters()),
            body,
        }
    }

    pub fn body(&self) -> &B {
        &self.body
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    fn local_index(&self, reference: &ParameterReference) -> Option<usize> {
        (reference.function() == self.id && reference.local_index() < self.store.len())
            .then(|| reference.local_index())
    }

    fn check_len(x: &[f64], len: usize) -> Result<()> {
        if x.len() == len {
            Ok(())
        } else {
            Err(FitError::DimensionMismatch(format!(
                "{} inputs but an output buffer of {}",
                x.len(),
                len
            )))
        }
    }
}

impl<B: LeafBody> ModelFunction for Leaf<B> {
    fn id(&self) -> FunctionId {
        self.id
    }

    fn name(&self) -> &str {
        self.body.name()
    }

    fn n_params(&self) -> usize {
        self.store.len()
    }

    fn parameter(&self, i: usize) -> Result<f64> {
        self.store.value(i)
    }

    fn set_parameter(&mut self, i: usize, value: f64, explicit: bool) -> Result<()> {
        self.store.set_value(i, value, explicit)
    }

    fn parameter_name(&self, i: usize) -> Result<String> {
        Ok(self.store.get(i)?.name().to_string())
    }

    fn parameter_description(&self, i: usize) -> Result<String> {
        Ok(self.store.get(i)?.description().to_string())
    }

    fn parameter_index_of(&self, name: &str) -> Result<usize> {
        self.store.index_of(name)
    }

    fn is_explicitly_set(&self, i: usize) -> Result<bool> {
        Ok(self.store.get(i)?.is_explicit())
    }

    fn declare_parameter(&mut self, spec: ParameterSpec) -> Result<usize> {
        self.store.declare(spec)
    }

    fn n_active(&self) -> usize {
        self.store.n_active()
    }

    fn set_active_parameter(&mut self, a: usize, value: f64) -> Result<()> {
        let i = self.store.index_of_active(a)?;
        let explicit = self.store.get(i)?.is_explicit();
        self.store.set_value(i, value, explicit)
    }

    fn index_of_active(&self, a: usize) -> Result<usize> {
        self.store.index_of_active(a)
    }

    fn active_index(&self, i: usize) -> Result<Option<usize>> {
        self.store.active_index(i)
    }

    fn is_fixed(&self, i: usize) -> Result<bool> {
        self.store.is_fixed(i)
    }

    fn remove_active(&mut self, i: usize) -> Result<()> {
        self.store.fix(i)
    }

    fn restore_active(&mut self, i: usize) -> Result<()> {
        self.store.unfix(i)
    }

    fn evaluate(&self, x: &[f64], out: &mut [f64]) -> Result<()> {
        Self::check_len(x, out.len())?;
        self.body.function(&self.store.values(), x, out)
    }

    fn evaluate_derivative(&mut self, x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        Self::check_len(x, jac.n_rows())?;
        self.body.derivative(&self.store.values(), x, jac)
    }

    fn has_analytic_derivative(&self) -> bool {
        self.body.has_derivative()
    }

    fn collect_values(&self, values: &mut ParameterValues) {
        values.insert(self.id, self.store.values());
    }

    fn apply_ties_with(&mut self, values: &ParameterValues) -> Result<()> {
        self.store.apply_ties(values)
    }

    fn attach_tie(&mut self, tie: Tie) -> Result<()> {
        let i = self.local_index(tie.target()).ok_or_else(|| {
            FitError::LogicError(format!(
                "tie target {} is not a parameter of {}",
                tie.target(),
                self.name()
            ))
        })?;
        debug!(function = self.name(), parameter = i, "tie added");
        self.store.add_tie(i, tie)
    }

    fn remove_tie(&mut self, i: usize) -> Result<bool> {
        self.store.remove_tie(i)
    }

    fn tie_of(&self, i: usize) -> Result<Option<&Tie>> {
        self.store.tie(i)
    }

    fn clear_ties(&mut self) {
        self.store.clear_ties();
    }

    fn parameter_index(&self, reference: &ParameterReference) -> Option<usize> {
        self.local_index(reference)
    }

    fn parameter_reference(&self, i: usize) -> Result<ParameterReference> {
        check_index(IndexKind::Declared, i, self.store.len())?;
        Ok(ParameterReference::new(self.id, i))
    }

    fn function_ids(&self, ids: &mut Vec<FunctionId>) {
        ids.push(self.id);
    }

    fn add_constraint(&mut self, i: usize, constraint: BoundaryConstraint) -> Result<()> {
        self.store.add_constraint(i, constraint)
    }

    fn remove_constraint(&mut self, i: usize) -> Result<bool> {
        self.store.remove_constraint(i)
    }

    fn constraint_of(&self, i: usize) -> Result<Option<&BoundaryConstraint>> {
        self.store.constraint(i)
    }

    fn constraints(&self) -> Box<dyn Iterator<Item = (usize, BoundaryConstraint)> + '_> {
        Box::new(self.store.constraints().map(|(i, c)| (i, *c)))
    }

    fn penalty(&self) -> f64 {
        self.store.penalty()
    }

    fn add_penalty_derivative(&self, jac: &mut dyn Jacobian) -> Result<()> {
        for (i, constraint) in self.store.constraints() {
            if let Some(a) = self.store.active_index(i)? {
                jac.add_to_column(a, constraint.penalty_derivative(self.store.value(i)?));
            }
        }
        Ok(())
    }

    fn as_string(&self) -> String {
        let mut items = vec![format!("name={}", self.name())];
        items.extend(
            self.body
                .attributes()
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value)),
        );

        // explicit values are written plainly; other values only when they
        // moved off the declared default and no tie recomputes them
        let defaults = self.body.parameters();
        let mut implicit = Vec::new();
        for (p, spec) in self.store.iter().zip(&defaults) {
            if p.is_explicit() {
                items.push(format!("{}={}", p.name(), p.value()));
            } else if p.status() != ParameterStatus::Tied && p.value() != spec.default {
                implicit.push(format!("{}={}", p.name(), p.value()));
            }
        }
        if !implicit.is_empty() {
            items.push(format!("implicit=({})", implicit.join(",")));
        }

        let mut ties = Vec::new();
        for p in self.store.iter() {
            if p.status() == ParameterStatus::Fixed {
                ties.push(format!("{}={}", p.name(), p.value()));
            }
        }
        for (i, tie) in self.store.ties() {
            // ties reading other functions are written by the enclosing composite
            if let Some(expr) = tie.expression_string(self) {
                ties.push(format!("{}={}", self.store.get(i).map_or("", |p| p.name()), expr));
            }
        }
        if !ties.is_empty() {
            items.push(format!("ties=({})", ties.join(",")));
        }

        let constraints: Vec<String> = self
            .store
            .constraints()
            .filter_map(|(i, c)| self.store.get(i).ok().map(|p| c.format(p.name())))
            .collect();
        if !constraints.is_empty() {
            items.push(format!("constraints=({})", constraints.join(",")));
        }
        items.join(",")
    }

    fn attributes(&self) -> Vec<(String, String)> {
        self.body.attributes()
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        if self.store.ties().next().is_some() || self.store.constraints().next().is_some() {
            return Err(FitError::LogicError(format!(
                "cannot change attribute '{}' of {} while it has ties or constraints",
                name,
                self.name()
            )));
        }
        self.body.set_attribute(name, value)?;
        let mut store = ParameterStore::from_specs(self.body.parameters());
        for (i, old) in self.store.iter().enumerate() {
            if let Ok(j) = store.index_of(old.name()) {
                store.set_value(j, old.value(), old.is_explicit())?;
                if self.store.is_fixed(i)? {
                    store.fix(j)?;
                }
            }
        }
        self.store = store;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ModelFunction> {
        Box::new(self.clone())
    }
}
