//! # Parameter System
//!
//! Building blocks for the parameters a model function owns.
//!
//! ## Key Features
//!
//! - **Declared and active spaces**: every parameter is declared by exactly one
//!   leaf function; only active parameters are seen by a solver
//! - **Stable references**: [`ParameterReference`] addresses a parameter by
//!   function id and local index, independent of tree layout
//! - **Ties**: a parameter may be computed from an [`Expression`] over other
//!   parameters, which removes it from the active space
//! - **Boundary constraints**: soft bounds enforced through penalty terms
//!
//! ## Core Components
//!
//! - [`Parameter`]: one named coefficient with its value and fit status
//! - [`ParameterStore`]: the declared/active bookkeeping of a leaf function
//! - [`Tie`] and [`Expression`]: computed parameters
//! - [`BoundaryConstraint`]: penalty-based bounds
//!
//! ## Example Usage
//!
//! ```rust
//! use fitcore::parameters::{ParameterSpec, ParameterStore};
//!
//! let mut store = ParameterStore::new();
//! store.declare(ParameterSpec::new("Height", 1.0)).unwrap();
//! store.declare(ParameterSpec::new("Sigma", 0.5)).unwrap();
//! store.declare(ParameterSpec::new("PeakCentre", 0.0)).unwrap();
//!
//! // Fixing a parameter removes it from the active space only
//! store.fix(1).unwrap();
//! assert_eq!(store.len(), 3);
//! assert_eq!(store.n_active(), 2);
//! assert_eq!(store.active_index(2).unwrap(), Some(1));
//! ```

pub mod constraints;
pub mod expression;
pub mod parameter;
pub mod reference;
pub mod store;
pub mod tie;

// Re-export key types
pub use constraints::{BoundaryConstraint, DEFAULT_PENALTY_FACTOR};
pub use expression::{EvaluationContext, Expression, ExpressionError, SimpleContext};
pub use parameter::{Parameter, ParameterSpec, ParameterStatus};
pub use reference::{FunctionId, ParameterReference, ParameterValues};
pub use store::ParameterStore;
pub use tie::Tie;
