//! Levenberg-Marquardt algorithm implementation.
//!
//! The solver drives any [`Problem`](crate::problem::Problem); the
//! [`OptimizerAdapter`](crate::adapter::OptimizerAdapter) is the problem used
//! to fit a model function tree.

pub mod algorithm;
pub mod config;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
