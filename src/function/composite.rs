//! Composite functions: the sum of an ordered list of children.
//!
//! A composite owns no parameters of its own. Every declared or active index
//! is resolved through its [`ParameterIndexTable`] to a child and a local
//! index, and the call is forwarded. Structural changes update the table in
//! place; debug builds check it against a full rebuild after every change.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{check_index, FitError, IndexKind, Result};
use crate::function::{Jacobian, ModelFunction, ParameterIndexTable, PartialJacobian};
use crate::parameters::{
    BoundaryConstraint, FunctionId, ParameterReference, ParameterSpec, ParameterValues, Tie,
};

const NAME: &str = "CompositeFunction";

/// Split `f<index>.<name>` into the child index and the rest of the name.
pub fn split_parameter_name(name: &str) -> Result<(usize, &str)> {
    let invalid = |reason: &str| {
        FitError::InvalidArgument(format!("{} in parameter name '{}'", reason, name))
    };
    let (prefix, local) = name
        .split_once('.')
        .ok_or_else(|| invalid("parameter name must contain function index"))?;
    if local.is_empty() {
        return Err(invalid("missing local name"));
    }
    let digits = prefix
        .strip_prefix('f')
        .ok_or_else(|| invalid("function index must start with 'f'"))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("malformed function index"));
    }
    let index = digits
        .parse()
        .map_err(|_| invalid("function index out of range"))?;
    Ok((index, local))
}

/// A function whose value is the sum of its children's values.
#[derive(Debug)]
pub struct CompositeFunction {
    id: FunctionId,
    children: Vec<Box<dyn ModelFunction>>,
    table: ParameterIndexTable,
}

impl Default for CompositeFunction {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CompositeFunction {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            children: self.children.iter().map(|c| c.clone_box()).collect(),
            table: self.table.clone(),
        }
    }
}

impl CompositeFunction {
    pub fn new() -> Self {
        Self {
            id: FunctionId::next(),
            children: Vec::new(),
            table: ParameterIndexTable::new(),
        }
    }

    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, i: usize) -> Result<&dyn ModelFunction> {
        check_index(IndexKind::Child, i, self.children.len())?;
        Ok(self.children[i].as_ref())
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn ModelFunction> + '_ {
        self.children.iter().map(|c| c.as_ref())
    }

    pub fn table(&self) -> &ParameterIndexTable {
        &self.table
    }

    /// Append a child, returning its index.
    pub fn add_child<F: ModelFunction + 'static>(&mut self, function: F) -> Result<usize> {
        self.add_boxed_child(Box::new(function))
    }

    /// Append a boxed child. A function already in this tree, or a clone of
    /// one, is rejected.
    pub fn add_boxed_child(&mut self, function: Box<dyn ModelFunction>) -> Result<usize> {
        self.check_new_ids(function.as_ref(), None)?;
        self.table.push_child(function.n_params(), function.n_active());
        self.children.push(function);
        self.debug_check();
        let index = self.children.len() - 1;
        debug!(child = index, function = self.children[index].name(), "child added");
        Ok(index)
    }

    /// Detach child `i` and hand it back. Dropping the returned box destroys
    /// the child.
    ///
    /// Ties elsewhere in the tree that read the child's parameters are
    /// removed first, as are ties inside the child that read parameters
    /// outside it.
    pub fn remove_child(&mut self, i: usize) -> Result<Box<dyn ModelFunction>> {
        check_index(IndexKind::Child, i, self.children.len())?;
        let removed = self.drop_ties_into(i)?;

        let child = &mut self.children[i];
        let escaping: Vec<usize> = (0..child.n_params())
            .filter(|&l| matches!(child.tie_of(l), Ok(Some(t)) if !t.references_only(&removed)))
            .collect();
        for l in escaping {
            child.remove_tie(l)?;
        }

        let child = self.children.remove(i);
        self.table.remove_child(i)?;
        self.debug_check();
        debug!(child = i, function = child.name(), "child removed");
        Ok(child)
    }

    /// Put `function` in place of child `i`; the old child is destroyed.
    pub fn replace_child<F: ModelFunction + 'static>(
        &mut self,
        i: usize,
        function: F,
    ) -> Result<()> {
        self.replace_boxed_child(i, Box::new(function))
    }

    pub fn replace_boxed_child(
        &mut self,
        i: usize,
        function: Box<dyn ModelFunction>,
    ) -> Result<()> {
        check_index(IndexKind::Child, i, self.children.len())?;
        self.check_new_ids(function.as_ref(), Some(i))?;
        self.drop_ties_into(i)?;
        self.table
            .resize_child(i, function.n_params(), function.n_active())?;
        let old = std::mem::replace(&mut self.children[i], function);
        self.debug_check();
        debug!(
            child = i,
            old = old.name(),
            new = self.children[i].name(),
            "child replaced"
        );
        Ok(())
    }

    /// Run `op` on child `i`, then bring the table up to date with whatever
    /// the child's counts became.
    pub fn modify_child<R>(
        &mut self,
        i: usize,
        op: impl FnOnce(&mut dyn ModelFunction) -> Result<R>,
    ) -> Result<R> {
        check_index(IndexKind::Child, i, self.children.len())?;
        let result = op(self.children[i].as_mut());
        let child = &self.children[i];
        self.table
            .resize_child(i, child.n_params(), child.n_active())?;
        self.debug_check();
        result
    }

    /// Forward to a child an operation that can only change its active count.
    fn forward_active<R>(
        &mut self,
        i: usize,
        op: impl FnOnce(&mut dyn ModelFunction) -> Result<R>,
    ) -> Result<R> {
        let child = self.children[i].as_mut();
        let before = child.n_active() as isize;
        let result = op(child);
        let delta = self.children[i].n_active() as isize - before;
        if delta != 0 {
            self.table.shift_active(i, delta)?;
        }
        self.debug_check();
        result
    }

    /// Remove every tie outside child `i` that reads a parameter inside it,
    /// resolving indices with the current offsets. Returns the ids of the
    /// child's subtree.
    fn drop_ties_into(&mut self, i: usize) -> Result<HashSet<FunctionId>> {
        let mut ids = Vec::new();
        self.children[i].function_ids(&mut ids);
        let subtree: HashSet<FunctionId> = ids.into_iter().collect();

        let start = self.table.declared_offset(i)?;
        let (count, _) = self.table.child_counts(i)?;
        let dangling: Vec<usize> = (0..self.n_params())
            .filter(|j| !(start..start + count).contains(j))
            .filter(|&j| matches!(self.tie_of(j), Ok(Some(t)) if t.references_any(&subtree)))
            .collect();
        for j in dangling {
            debug!(parameter = j, "dropping tie on removed function");
            self.remove_tie(j)?;
        }
        Ok(subtree)
    }

    fn check_new_ids(&self, function: &dyn ModelFunction, replacing: Option<usize>) -> Result<()> {
        let mut existing = vec![self.id];
        for (k, child) in self.children.iter().enumerate() {
            if Some(k) != replacing {
                child.function_ids(&mut existing);
            }
        }
        let existing: HashSet<FunctionId> = existing.into_iter().collect();
        let mut incoming = Vec::new();
        function.function_ids(&mut incoming);
        if incoming.iter().any(|id| existing.contains(id)) {
            return Err(FitError::InvalidArgument(format!(
                "{} is already part of this composite function",
                function.name()
            )));
        }
        Ok(())
    }

    fn debug_check(&self) {
        debug_assert!(
            self.table.is_consistent_with(&self.children),
            "parameter index table out of sync with children"
        );
    }

    fn child_string(child: &dyn ModelFunction) -> String {
        if child.is_composite() {
            format!("({})", child.as_string())
        } else {
            child.as_string()
        }
    }
}

impl ModelFunction for CompositeFunction {
    fn id(&self) -> FunctionId {
        self.id
    }

    fn name(&self) -> &str {
        NAME
    }

    fn n_params(&self) -> usize {
        self.table.n_params()
    }

    fn parameter(&self, i: usize) -> Result<f64> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].parameter(l)
    }

    fn set_parameter(&mut self, i: usize, value: f64, explicit: bool) -> Result<()> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].set_parameter(l, value, explicit)
    }

    fn parameter_name(&self, i: usize) -> Result<String> {
        let (c, l) = self.table.child_of(i)?;
        Ok(format!("f{}.{}", c, self.children[c].parameter_name(l)?))
    }

    fn parameter_description(&self, i: usize) -> Result<String> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].parameter_description(l)
    }

    fn parameter_index_of(&self, name: &str) -> Result<usize> {
        let (c, local) = split_parameter_name(name)?;
        let child = self.child(c)?;
        Ok(self.table.declared_offset(c)? + child.parameter_index_of(local)?)
    }

    fn is_explicitly_set(&self, i: usize) -> Result<bool> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].is_explicitly_set(l)
    }

    fn declare_parameter(&mut self, spec: ParameterSpec) -> Result<usize> {
        Err(FitError::InvalidArgument(format!(
            "composite functions cannot declare parameters (got '{}')",
            spec.name
        )))
    }

    fn n_active(&self) -> usize {
        self.table.n_active()
    }

    fn active_parameter(&self, a: usize) -> Result<f64> {
        let (c, la) = self.table.active_child_of(a)?;
        self.children[c].active_parameter(la)
    }

    fn set_active_parameter(&mut self, a: usize, value: f64) -> Result<()> {
        let (c, la) = self.table.active_child_of(a)?;
        self.children[c].set_active_parameter(la, value)
    }

    fn index_of_active(&self, a: usize) -> Result<usize> {
        let (c, la) = self.table.active_child_of(a)?;
        Ok(self.table.declared_offset(c)? + self.children[c].index_of_active(la)?)
    }

    fn active_index(&self, i: usize) -> Result<Option<usize>> {
        let (c, l) = self.table.child_of(i)?;
        let offset = self.table.active_offset(c)?;
        Ok(self.children[c].active_index(l)?.map(|a| a + offset))
    }

    fn is_fixed(&self, i: usize) -> Result<bool> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].is_fixed(l)
    }

    fn remove_active(&mut self, i: usize) -> Result<()> {
        let (c, l) = self.table.child_of(i)?;
        self.forward_active(c, |child| child.remove_active(l))
    }

    fn restore_active(&mut self, i: usize) -> Result<()> {
        let (c, l) = self.table.child_of(i)?;
        self.forward_active(c, |child| child.restore_active(l))
    }

    fn set_active_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.n_active() {
            return Err(FitError::DimensionMismatch(format!(
                "expected {} active values, got {}",
                self.n_active(),
                values.len()
            )));
        }
        for (child, (_, start)) in self.children.iter_mut().zip(self.table.offsets()) {
            let end = start + child.n_active();
            child.set_active_values(&values[start..end])?;
        }
        Ok(())
    }

    fn evaluate(&self, x: &[f64], out: &mut [f64]) -> Result<()> {
        if x.len() != out.len() {
            return Err(FitError::DimensionMismatch(format!(
                "{} inputs but an output buffer of {}",
                x.len(),
                out.len()
            )));
        }
        let Some((first, rest)) = self.children.split_first() else {
            out.fill(0.0);
            return Ok(());
        };
        first.evaluate(x, out)?;
        if rest.is_empty() {
            return Ok(());
        }
        let mut scratch = vec![0.0; out.len()];
        for child in rest {
            child.evaluate(x, &mut scratch)?;
            for (o, s) in out.iter_mut().zip(&scratch) {
                *o += s;
            }
        }
        Ok(())
    }

    fn evaluate_derivative(&mut self, x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        for (child, (declared, active)) in self.children.iter_mut().zip(self.table.offsets()) {
            child.evaluate_derivative(x, &mut PartialJacobian::new(&mut *jac, declared, active))?;
        }
        Ok(())
    }

    fn has_analytic_derivative(&self) -> bool {
        self.children.iter().all(|c| c.has_analytic_derivative())
    }

    fn derive(&mut self, x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        for (child, (declared, active)) in self.children.iter_mut().zip(self.table.offsets()) {
            child.derive(x, &mut PartialJacobian::new(&mut *jac, declared, active))?;
        }
        Ok(())
    }

    fn collect_values(&self, values: &mut ParameterValues) {
        for child in &self.children {
            child.collect_values(values);
        }
    }

    fn apply_ties_with(&mut self, values: &ParameterValues) -> Result<()> {
        for child in &mut self.children {
            child.apply_ties_with(values)?;
        }
        Ok(())
    }

    fn attach_tie(&mut self, tie: Tie) -> Result<()> {
        let i = self.parameter_index(tie.target()).ok_or_else(|| {
            FitError::LogicError(format!(
                "tie target {} is not part of this composite function",
                tie.target()
            ))
        })?;
        let (c, _) = self.table.child_of(i)?;
        self.forward_active(c, |child| child.attach_tie(tie))
    }

    fn remove_tie(&mut self, i: usize) -> Result<bool> {
        let (c, l) = self.table.child_of(i)?;
        self.forward_active(c, |child| child.remove_tie(l))
    }

    fn tie_of(&self, i: usize) -> Result<Option<&Tie>> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].tie_of(l)
    }

    fn clear_ties(&mut self) {
        for child in &mut self.children {
            child.clear_ties();
        }
        self.table.reconcile(&self.children);
    }

    fn parameter_index(&self, reference: &ParameterReference) -> Option<usize> {
        if reference.function() == self.id {
            return None;
        }
        self.children
            .iter()
            .zip(self.table.offsets())
            .find_map(|(child, (declared, _))| {
                child.parameter_index(reference).map(|l| declared + l)
            })
    }

    fn parameter_reference(&self, i: usize) -> Result<ParameterReference> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].parameter_reference(l)
    }

    fn function_ids(&self, ids: &mut Vec<FunctionId>) {
        ids.push(self.id);
        for child in &self.children {
            child.function_ids(ids);
        }
    }

    fn add_constraint(&mut self, i: usize, constraint: BoundaryConstraint) -> Result<()> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].add_constraint(l, constraint)
    }

    fn remove_constraint(&mut self, i: usize) -> Result<bool> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].remove_constraint(l)
    }

    fn constraint_of(&self, i: usize) -> Result<Option<&BoundaryConstraint>> {
        let (c, l) = self.table.child_of(i)?;
        self.children[c].constraint_of(l)
    }

    fn constraints(&self) -> Box<dyn Iterator<Item = (usize, BoundaryConstraint)> + '_> {
        Box::new(
            self.children
                .iter()
                .zip(self.table.offsets())
                .flat_map(|(child, (declared, _))| {
                    child.constraints().map(move |(i, c)| (declared + i, c))
                }),
        )
    }

    fn penalty(&self) -> f64 {
        self.children.iter().map(|c| c.penalty()).sum()
    }

    fn add_penalty_derivative(&self, jac: &mut dyn Jacobian) -> Result<()> {
        for (child, (declared, active)) in self.children.iter().zip(self.table.offsets()) {
            child.add_penalty_derivative(&mut PartialJacobian::new(&mut *jac, declared, active))?;
        }
        Ok(())
    }

    fn as_string(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            out.push_str(&Self::child_string(child.as_ref()));
            out.push(';');
        }

        // ties the owning child cannot write because they read its siblings
        let mut ties = Vec::new();
        for i in 0..self.n_params() {
            let (Ok(Some(tie)), Ok((c, _))) = (self.tie_of(i), self.table.child_of(i)) else {
                continue;
            };
            if tie.expression_string(self.children[c].as_ref()).is_some() {
                continue;
            }
            if let (Some(expr), Ok(name)) = (tie.expression_string(self), self.parameter_name(i)) {
                ties.push(format!("{}={}", name, expr));
            }
        }
        if !ties.is_empty() {
            out.push_str(&format!("ties=({})", ties.join(",")));
        }
        out
    }

    fn is_composite(&self) -> bool {
        true
    }

    fn clone_box(&self) -> Box<dyn ModelFunction> {
        Box::new(self.clone())
    }
}
