//! Exponential decay.

use crate::error::{FitError, Result};
use crate::function::{Leaf, LeafBody};
use crate::parameters::ParameterSpec;

/// f(x) = Height * exp(-x / Lifetime)
///
/// There is no analytic derivative; fits of this function use forward
/// differences.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpDecay;

impl ExpDecay {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Leaf<ExpDecay> {
        Leaf::new(ExpDecay)
    }
}

impl LeafBody for ExpDecay {
    fn name(&self) -> &str {
        "ExpDecay"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("Height", 1.0).with_description("Value at x = 0"),
            ParameterSpec::new("Lifetime", 1.0).with_description("Decay constant"),
        ]
    }

    fn function(&self, p: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        let (height, lifetime) = (p[0], p[1]);
        if lifetime == 0.0 {
            return Err(FitError::FunctionEvaluation(
                "ExpDecay lifetime must be non-zero".to_string(),
            ));
        }
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = height * (-xi / lifetime).exp();
        }
        Ok(())
    }
}
