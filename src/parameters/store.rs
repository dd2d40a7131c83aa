//! Declared and active parameter bookkeeping for a single leaf function.
//!
//! The active index of a declared parameter is the number of active
//! parameters declared before it, so active indices always follow declaration
//! order no matter in which order parameters were fixed and restored.

use std::collections::BTreeMap;

use crate::error::{check_index, FitError, IndexKind, Result};
use crate::parameters::constraints::BoundaryConstraint;
use crate::parameters::parameter::{Parameter, ParameterSpec, ParameterStatus};
use crate::parameters::reference::ParameterValues;
use crate::parameters::tie::Tie;

#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    parameters: Vec<Parameter>,
    ties: BTreeMap<usize, Tie>,
    constraints: BTreeMap<usize, BoundaryConstraint>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from declarations without checking for duplicate names;
    /// name lookup returns the first match.
    pub fn from_specs(specs: impl IntoIterator<Item = ParameterSpec>) -> Self {
        Self {
            parameters: specs.into_iter().map(Parameter::from_spec).collect(),
            ties: BTreeMap::new(),
            constraints: BTreeMap::new(),
        }
    }

    /// Declare a new active parameter, returning its declared index.
    pub fn declare(&mut self, spec: ParameterSpec) -> Result<usize> {
        if spec.name.is_empty() || spec.name.contains(['.', ',', '=', ';', '(', ')']) {
            return Err(FitError::InvalidArgument(format!(
                "'{}' is not a valid parameter name",
                spec.name
            )));
        }
        if self.index_of(&spec.name).is_ok() {
            return Err(FitError::InvalidArgument(format!(
                "parameter '{}' is already declared",
                spec.name
            )));
        }
        self.parameters.push(Parameter::from_spec(spec));
        Ok(self.parameters.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn get(&self, i: usize) -> Result<&Parameter> {
        self.parameters
            .get(i)
            .ok_or_else(|| FitError::index_out_of_range(IndexKind::Declared, i, self.len()))
    }

    fn get_mut(&mut self, i: usize) -> Result<&mut Parameter> {
        let len = self.len();
        self.parameters
            .get_mut(i)
            .ok_or_else(|| FitError::index_out_of_range(IndexKind::Declared, i, len))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> + '_ {
        self.parameters.iter()
    }

    pub fn value(&self, i: usize) -> Result<f64> {
        Ok(self.get(i)?.value())
    }

    pub fn set_value(&mut self, i: usize, value: f64, explicit: bool) -> Result<()> {
        self.get_mut(i)?.set_value(value, explicit);
        Ok(())
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::value).collect()
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.parameters
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| FitError::InvalidArgument(format!("parameter '{}' not found", name)))
    }

    pub fn n_active(&self) -> usize {
        self.parameters.iter().filter(|p| p.is_active()).count()
    }

    pub fn is_active(&self, i: usize) -> Result<bool> {
        Ok(self.get(i)?.is_active())
    }

    /// Active index of declared parameter `i`, `None` if fixed or tied.
    pub fn active_index(&self, i: usize) -> Result<Option<usize>> {
        if !self.is_active(i)? {
            return Ok(None);
        }
        Ok(Some(self.parameters[..i].iter().filter(|p| p.is_active()).count()))
    }

    /// Declared index of active parameter `a`.
    pub fn index_of_active(&self, a: usize) -> Result<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active())
            .nth(a)
            .map(|(i, _)| i)
            .ok_or_else(|| FitError::index_out_of_range(IndexKind::Active, a, self.n_active()))
    }

    /// Remove an active parameter from the active space. Fixed and tied
    /// parameters are left as they are.
    pub fn fix(&mut self, i: usize) -> Result<()> {
        let param = self.get_mut(i)?;
        if param.is_active() {
            param.set_status(ParameterStatus::Fixed);
        }
        Ok(())
    }

    /// Return a fixed or tied parameter to the active space, dropping its tie.
    pub fn unfix(&mut self, i: usize) -> Result<()> {
        self.get_mut(i)?.set_status(ParameterStatus::Active);
        self.ties.remove(&i);
        Ok(())
    }

    pub fn is_fixed(&self, i: usize) -> Result<bool> {
        Ok(self.get(i)?.status() == ParameterStatus::Fixed)
    }

    /// Attach a tie to parameter `i`, replacing any previous tie.
    pub fn add_tie(&mut self, i: usize, tie: Tie) -> Result<()> {
        self.get_mut(i)?.set_status(ParameterStatus::Tied);
        self.ties.insert(i, tie);
        Ok(())
    }

    /// Remove the tie on parameter `i`. Returns whether there was one.
    pub fn remove_tie(&mut self, i: usize) -> Result<bool> {
        check_index(IndexKind::Declared, i, self.len())?;
        if self.ties.remove(&i).is_none() {
            return Ok(false);
        }
        self.parameters[i].set_status(ParameterStatus::Active);
        Ok(true)
    }

    pub fn tie(&self, i: usize) -> Result<Option<&Tie>> {
        check_index(IndexKind::Declared, i, self.len())?;
        Ok(self.ties.get(&i))
    }

    pub fn ties(&self) -> impl Iterator<Item = (usize, &Tie)> + '_ {
        self.ties.iter().map(|(i, tie)| (*i, tie))
    }

    pub fn clear_ties(&mut self) {
        for i in std::mem::take(&mut self.ties).into_keys() {
            self.parameters[i].set_status(ParameterStatus::Active);
        }
    }

    /// Recompute every tied parameter from `values` in a single pass.
    ///
    /// All expressions are evaluated before any value is written, so a tie
    /// reading another tied parameter sees its value from before this pass.
    pub fn apply_ties(&mut self, values: &ParameterValues) -> Result<()> {
        let mut updates = Vec::with_capacity(self.ties.len());
        for (i, tie) in &self.ties {
            if let Some(value) = tie.evaluate(values)? {
                updates.push((*i, value));
            }
        }
        for (i, value) in updates {
            self.parameters[i].assign(value);
        }
        Ok(())
    }

    /// Constrain parameter `i`, replacing any previous constraint.
    pub fn add_constraint(&mut self, i: usize, constraint: BoundaryConstraint) -> Result<()> {
        check_index(IndexKind::Declared, i, self.len())?;
        self.constraints.insert(i, constraint);
        Ok(())
    }

    pub fn remove_constraint(&mut self, i: usize) -> Result<bool> {
        check_index(IndexKind::Declared, i, self.len())?;
        Ok(self.constraints.remove(&i).is_some())
    }

    pub fn constraint(&self, i: usize) -> Result<Option<&BoundaryConstraint>> {
        check_index(IndexKind::Declared, i, self.len())?;
        Ok(self.constraints.get(&i))
    }

    /// Constraints keyed by declared index. Each call starts a fresh pass.
    pub fn constraints(&self) -> impl Iterator<Item = (usize, &BoundaryConstraint)> + '_ {
        self.constraints.iter().map(|(i, c)| (*i, c))
    }

    /// Total penalty of the constraints on active parameters.
    pub fn penalty(&self) -> f64 {
        self.constraints()
            .filter(|(i, _)| self.parameters[*i].is_active())
            .map(|(i, c)| c.penalty(self.parameters[i].value()))
            .sum()
    }
}
