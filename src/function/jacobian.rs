//! Jacobian buffers and the partial views children write through.
//!
//! Functions address their derivatives by *declared* parameter index. The
//! buffer a solver owns has one column per *active* parameter, so it carries a
//! declared-to-active column map and drops writes to fixed or tied
//! parameters. Penalty terms are added per active column instead.

use ndarray::Array2;

use crate::error::{FitError, Result};
use crate::function::ModelFunction;

/// Sink for derivative values, one row per data point.
pub trait Jacobian {
    /// Number of data rows.
    fn n_rows(&self) -> usize;

    /// Store `value` as the derivative at `row` with respect to declared
    /// parameter `declared`.
    fn set(&mut self, row: usize, declared: usize, value: f64);

    /// Read back a value stored with [`set`](Jacobian::set); zero for a
    /// column the buffer does not keep.
    fn get(&self, row: usize, declared: usize) -> f64;

    /// Add `value` to the column of active parameter `active`.
    ///
    /// Only the first row, the last row and every tenth row starting at row
    /// 9 receive the value.
    fn add_to_column(&mut self, active: usize, value: f64);
}

/// Rows touched by [`Jacobian::add_to_column`] for a buffer of `n_rows`.
pub fn penalty_rows(n_rows: usize) -> impl Iterator<Item = usize> {
    let (first, last) = match n_rows {
        0 => (None, None),
        n => (Some(0), Some(n - 1)),
    };
    let interior = (9..n_rows.saturating_sub(1)).step_by(10);
    first.into_iter().chain(last).chain(interior)
}

/// Dense Jacobian storage with a declared-to-column map.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianBuffer {
    data: Array2<f64>,
    columns: Vec<Option<usize>>,
}

impl JacobianBuffer {
    /// Buffer with one column per active parameter of `function`.
    pub fn active(n_rows: usize, function: &dyn ModelFunction) -> Result<Self> {
        let columns = (0..function.n_params())
            .map(|i| function.active_index(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            data: Array2::zeros((n_rows, function.n_active())),
            columns,
        })
    }

    /// Buffer with one column per declared parameter.
    pub fn declared(n_rows: usize, n_params: usize) -> Self {
        Self {
            data: Array2::zeros((n_rows, n_params)),
            columns: (0..n_params).map(Some).collect(),
        }
    }

    /// Buffer with an explicit column map. Every mapped column must be
    /// smaller than `n_cols`.
    pub fn with_columns(n_rows: usize, n_cols: usize, columns: Vec<Option<usize>>) -> Result<Self> {
        if let Some(bad) = columns.iter().flatten().find(|&&c| c >= n_cols) {
            return Err(FitError::DimensionMismatch(format!(
                "column {} does not fit a buffer with {} columns",
                bad, n_cols
            )));
        }
        Ok(Self {
            data: Array2::zeros((n_rows, n_cols)),
            columns,
        })
    }

    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    /// Zero every cell, keeping the shape and column map.
    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn matrix_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    pub fn into_matrix(self) -> Array2<f64> {
        self.data
    }

    fn column(&self, declared: usize) -> Option<usize> {
        self.columns.get(declared).copied().flatten()
    }
}

impl Jacobian for JacobianBuffer {
    fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    fn set(&mut self, row: usize, declared: usize, value: f64) {
        if let Some(col) = self.column(declared) {
            if let Some(cell) = self.data.get_mut((row, col)) {
                *cell = value;
            }
        }
    }

    fn get(&self, row: usize, declared: usize) -> f64 {
        self.column(declared)
            .and_then(|col| self.data.get((row, col)).copied())
            .unwrap_or(0.0)
    }

    fn add_to_column(&mut self, active: usize, value: f64) {
        if active >= self.data.ncols() {
            return;
        }
        for row in penalty_rows(self.data.nrows()) {
            self.data[[row, active]] += value;
        }
    }
}

/// A child's window onto a parent Jacobian.
///
/// Declared and active indices are shifted by the child's offsets before
/// being forwarded. Narrowing a view borrows the same parent with summed
/// offsets, so nesting never copies.
pub struct PartialJacobian<'a> {
    parent: &'a mut dyn Jacobian,
    declared_offset: usize,
    active_offset: usize,
}

impl<'a> PartialJacobian<'a> {
    pub fn new(parent: &'a mut dyn Jacobian, declared_offset: usize, active_offset: usize) -> Self {
        Self {
            parent,
            declared_offset,
            active_offset,
        }
    }

    /// A view over this view; offsets add up.
    pub fn narrow(&mut self, declared_offset: usize, active_offset: usize) -> PartialJacobian<'_> {
        PartialJacobian {
            parent: &mut *self.parent,
            declared_offset: self.declared_offset + declared_offset,
            active_offset: self.active_offset + active_offset,
        }
    }

    pub fn declared_offset(&self) -> usize {
        self.declared_offset
    }

    pub fn active_offset(&self) -> usize {
        self.active_offset
    }
}

impl Jacobian for PartialJacobian<'_> {
    fn n_rows(&self) -> usize {
        self.parent.n_rows()
    }

    fn set(&mut self, row: usize, declared: usize, value: f64) {
        self.parent.set(row, self.declared_offset + declared, value);
    }

    fn get(&self, row: usize, declared: usize) -> f64 {
        self.parent.get(row, self.declared_offset + declared)
    }

    fn add_to_column(&mut self, active: usize, value: f64) {
        self.parent.add_to_column(self.active_offset + active, value);
    }
}
