//! # fitcore
//!
//! `fitcore` builds fittable model functions out of smaller ones and fits
//! them with a Levenberg-Marquardt solver.
//!
//! The library provides:
//! - Leaf functions with named parameters that can be fixed, tied to an
//!   expression of other parameters, or bounded by penalty constraints
//! - Composite functions that sum their children and map a flat parameter
//!   index onto the owning child
//! - A text form for every function tree and a parser that rebuilds it
//! - An adapter exposing a tree as weighted residuals and Jacobians to any
//!   least-squares solver, with forward-difference derivatives where a
//!   function has no analytic one
//!
//! ## Basic Usage
//!
//! ```
//! use fitcore::{fit, FitData, FunctionFactory, LmConfig};
//!
//! let mut model = FunctionFactory::new()
//!     .parse("name=Gaussian,Height=1,PeakCentre=0.2,Sigma=0.8;name=FlatBackground,A0=0")
//!     .unwrap();
//!
//! let x: Vec<f64> = (0..60).map(|i| -3.0 + 0.1 * i as f64).collect();
//! let y: Vec<f64> = x.iter().map(|x| 4.0 * (-0.5 * x * x).exp() + 0.5).collect();
//! let data = FitData::new(x, y).unwrap();
//!
//! let result = fit(model.as_mut(), &data, &LmConfig::default()).unwrap();
//! assert!(result.success);
//! assert!((model.parameter_by_name("f0.Height").unwrap() - 4.0).abs() < 1e-4);
//! ```

pub mod error;

pub mod function;

pub mod models;

pub mod parameters;

#[cfg(feature = "lm")]
pub mod adapter;

#[cfg(feature = "lm")]
pub mod cost;

#[cfg(feature = "lm")]
pub mod fit;

#[cfg(feature = "lm")]
pub mod lm;

#[cfg(feature = "lm")]
pub mod problem;

// Re-exports for convenience
pub use error::{FitError, Result};
pub use function::{CompositeFunction, FunctionFactory, ModelFunction};

#[cfg(feature = "lm")]
pub use adapter::{FitData, OptimizerAdapter};

#[cfg(feature = "lm")]
pub use fit::{fit, fit_many, FitResult};

#[cfg(feature = "lm")]
pub use lm::{LevenbergMarquardt, LmConfig};

#[cfg(feature = "lm")]
pub use problem::Problem;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
