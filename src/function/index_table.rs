//! Offset bookkeeping of a composite function's children.

use crate::error::{FitError, IndexKind, Result};
use crate::function::ModelFunction;

/// Declared and active offsets of every child of one composite, plus the
/// reverse owner maps.
///
/// `declared_offsets` and `active_offsets` have one entry per child and one
/// trailing total, so the parameters of child `i` occupy
/// `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterIndexTable {
    declared_offsets: Vec<usize>,
    active_offsets: Vec<usize>,
    declared_owner: Vec<usize>,
    active_owner: Vec<usize>,
}

impl Default for ParameterIndexTable {
    fn default() -> Self {
        Self {
            declared_offsets: vec![0],
            active_offsets: vec![0],
            declared_owner: Vec::new(),
            active_owner: Vec::new(),
        }
    }
}

fn owners(offsets: &[usize]) -> Vec<usize> {
    offsets
        .windows(2)
        .enumerate()
        .flat_map(|(child, w)| std::iter::repeat(child).take(w[1] - w[0]))
        .collect()
}

fn prefix_sums(counts: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut offsets = vec![0];
    let mut total = 0;
    for count in counts {
        total += count;
        offsets.push(total);
    }
    offsets
}

impl ParameterIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for children with the given `(declared, active)` counts.
    pub fn from_counts(counts: &[(usize, usize)]) -> Self {
        let declared_offsets = prefix_sums(counts.iter().map(|c| c.0));
        let active_offsets = prefix_sums(counts.iter().map(|c| c.1));
        Self {
            declared_owner: owners(&declared_offsets),
            active_owner: owners(&active_offsets),
            declared_offsets,
            active_offsets,
        }
    }

    /// Rebuild from the current counts of `children`.
    pub fn reconcile(&mut self, children: &[Box<dyn ModelFunction>]) {
        let counts: Vec<(usize, usize)> = children
            .iter()
            .map(|c| (c.n_params(), c.n_active()))
            .collect();
        *self = Self::from_counts(&counts);
    }

    pub fn n_children(&self) -> usize {
        self.declared_offsets.len() - 1
    }

    pub fn n_params(&self) -> usize {
        self.declared_owner.len()
    }

    pub fn n_active(&self) -> usize {
        self.active_owner.len()
    }

    pub fn declared_offset(&self, child: usize) -> Result<usize> {
        self.check_child(child)?;
        Ok(self.declared_offsets[child])
    }

    pub fn active_offset(&self, child: usize) -> Result<usize> {
        self.check_child(child)?;
        Ok(self.active_offsets[child])
    }

    /// `(declared, active)` offsets of every child, in child order.
    pub fn offsets(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.declared_offsets
            .iter()
            .copied()
            .zip(self.active_offsets.iter().copied())
            .take(self.n_children())
    }

    /// `(declared, active)` parameter counts of `child`.
    pub fn child_counts(&self, child: usize) -> Result<(usize, usize)> {
        self.check_child(child)?;
        Ok((
            self.declared_offsets[child + 1] - self.declared_offsets[child],
            self.active_offsets[child + 1] - self.active_offsets[child],
        ))
    }

    /// Owning child and local index of a declared parameter.
    pub fn child_of(&self, declared: usize) -> Result<(usize, usize)> {
        let child = *self
            .declared_owner
            .get(declared)
            .ok_or_else(|| {
                FitError::index_out_of_range(IndexKind::Declared, declared, self.n_params())
            })?;
        Ok((child, declared - self.declared_offsets[child]))
    }

    /// Owning child and local active index of an active parameter.
    pub fn active_child_of(&self, active: usize) -> Result<(usize, usize)> {
        let child = *self
            .active_owner
            .get(active)
            .ok_or_else(|| {
                FitError::index_out_of_range(IndexKind::Active, active, self.n_active())
            })?;
        Ok((child, active - self.active_offsets[child]))
    }

    /// Append a child.
    pub fn push_child(&mut self, n_params: usize, n_active: usize) {
        let child = self.n_children();
        self.declared_offsets.push(self.n_params() + n_params);
        self.active_offsets.push(self.n_active() + n_active);
        self.declared_owner.extend(std::iter::repeat(child).take(n_params));
        self.active_owner.extend(std::iter::repeat(child).take(n_active));
    }

    /// Drop child `child`, moving every later child down.
    pub fn remove_child(&mut self, child: usize) -> Result<()> {
        let (n_params, n_active) = self.child_counts(child)?;
        let (d0, a0) = (self.declared_offsets[child], self.active_offsets[child]);
        self.declared_owner.drain(d0..d0 + n_params);
        self.active_owner.drain(a0..a0 + n_active);
        for owner in self.declared_owner[d0..].iter_mut() {
            *owner -= 1;
        }
        for owner in self.active_owner[a0..].iter_mut() {
            *owner -= 1;
        }
        self.declared_offsets.remove(child + 1);
        self.active_offsets.remove(child + 1);
        for offset in self.declared_offsets[child + 1..].iter_mut() {
            *offset -= n_params;
        }
        for offset in self.active_offsets[child + 1..].iter_mut() {
            *offset -= n_active;
        }
        Ok(())
    }

    /// Replace the counts of `child`, shifting every later child.
    pub fn resize_child(&mut self, child: usize, n_params: usize, n_active: usize) -> Result<()> {
        let (old_params, old_active) = self.child_counts(child)?;
        let (d0, a0) = (self.declared_offsets[child], self.active_offsets[child]);
        self.declared_owner
            .splice(d0..d0 + old_params, std::iter::repeat(child).take(n_params));
        self.active_owner
            .splice(a0..a0 + old_active, std::iter::repeat(child).take(n_active));
        for offset in self.declared_offsets[child + 1..].iter_mut() {
            *offset = *offset + n_params - old_params;
        }
        for offset in self.active_offsets[child + 1..].iter_mut() {
            *offset = *offset + n_active - old_active;
        }
        Ok(())
    }

    /// Grow (`delta > 0`) or shrink the active count of `child`, shifting the
    /// active offsets of every later child by the same amount.
    pub fn shift_active(&mut self, child: usize, delta: isize) -> Result<()> {
        let (n_params, n_active) = self.child_counts(child)?;
        let n_active = n_active.checked_add_signed(delta).ok_or_else(|| {
            FitError::LogicError(format!(
                "active count of child {} cannot change by {}",
                child, delta
            ))
        })?;
        self.resize_child(child, n_params, n_active)
    }

    /// Check the offset invariants against the children's current counts.
    pub fn is_consistent_with(&self, children: &[Box<dyn ModelFunction>]) -> bool {
        let mut fresh = Self::new();
        fresh.reconcile(children);
        *self == fresh
    }

    fn check_child(&self, child: usize) -> Result<()> {
        if child < self.n_children() {
            Ok(())
        } else {
            Err(FitError::index_out_of_range(IndexKind::Child, child, self.n_children()))
        }
    }
}
