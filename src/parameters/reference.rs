//! Position-independent parameter addressing.
//!
//! A [`ParameterReference`] names "parameter `i` of function `F`" by the
//! function's stable [`FunctionId`] rather than by an offset into some
//! composite's parameter array, so it survives every structural change of
//! the tree. It never owns or points at the function: it is resolved on each
//! use by asking the tree which function carries the id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable handle identifying one function instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(u64);

impl FunctionId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lookup token for a declared parameter of a specific function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterReference {
    function: FunctionId,
    index: usize,
}

impl ParameterReference {
    pub fn new(function: FunctionId, index: usize) -> Self {
        Self { function, index }
    }

    /// The function that declares the parameter.
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Declared index of the parameter inside its own function.
    pub fn local_index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ParameterReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.function, self.index)
    }
}

/// Snapshot of every declared parameter value in a function tree, keyed by
/// function id.
///
/// Ties are evaluated against one snapshot per pass, so a tie that reads
/// another tied parameter sees the value it had before the pass started.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    values: HashMap<FunctionId, Vec<f64>>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the declared values of one function.
    pub fn insert(&mut self, function: FunctionId, values: Vec<f64>) {
        self.values.insert(function, values);
    }

    /// Value of the referenced parameter, or `None` if the function is not
    /// part of the snapshot.
    pub fn get(&self, reference: &ParameterReference) -> Option<f64> {
        self.values
            .get(&reference.function)
            .and_then(|values| values.get(reference.index))
            .copied()
    }

    pub fn contains_function(&self, function: FunctionId) -> bool {
        self.values.contains_key(&function)
    }

    /// Number of functions in the snapshot.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
