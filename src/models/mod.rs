//! Built-in leaf functions.
//!
//! A small set of common shapes, registered with
//! [`FunctionFactory`](crate::function::FunctionFactory) under their names.

mod exponential;
mod peak;
mod polynomial;

pub use exponential::ExpDecay;
pub use peak::{Gaussian, Lorentzian};
pub use polynomial::{FlatBackground, LinearBackground, Polynomial};
