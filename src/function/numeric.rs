//! Forward-difference derivatives for functions without an analytic one.

use crate::error::Result;
use crate::function::{Jacobian, ModelFunction};

/// Relative step applied to a parameter value.
pub const STEP_PERCENTAGE: f64 = 0.001;

/// Below this magnitude a relative step would underflow, so [`SMALL_STEP`] is
/// used instead.
pub const CUTOFF: f64 = 100.0 * f64::MIN_POSITIVE / STEP_PERCENTAGE;

/// Absolute step for parameters closer to zero than [`CUTOFF`].
pub const SMALL_STEP: f64 = 100.0 * f64::EPSILON;

/// One-sided finite differences over the active parameters of a function.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericalDifferentiator;

/// Puts an active parameter back when dropped, including on early return.
struct Restore<'a, F: ModelFunction + ?Sized> {
    function: &'a mut F,
    active: usize,
    value: f64,
}

impl<F: ModelFunction + ?Sized> Drop for Restore<'_, F> {
    fn drop(&mut self) {
        // Both calls succeeded with the same index before the perturbation.
        let _ = self.function.set_active_parameter(self.active, self.value);
        let _ = self.function.apply_ties();
    }
}

impl NumericalDifferentiator {
    /// Step used for a parameter currently at `value`.
    pub fn step(value: f64) -> f64 {
        if value.abs() < CUTOFF {
            SMALL_STEP
        } else {
            value * STEP_PERCENTAGE
        }
    }

    /// Fill the columns of every active parameter of `function` with
    /// `(f(p + h) - f(p)) / h`. Columns of fixed and tied parameters are not
    /// touched.
    pub fn derive<F>(function: &mut F, x: &[f64], jac: &mut dyn Jacobian) -> Result<()>
    where
        F: ModelFunction + ?Sized,
    {
        let mut base = vec![0.0; x.len()];
        function.evaluate(x, &mut base)?;
        let mut shifted = vec![0.0; x.len()];

        for a in 0..function.n_active() {
            let declared = function.index_of_active(a)?;
            let value = function.active_parameter(a)?;
            let step = Self::step(value);
            {
                let mut guard = Restore {
                    function: &mut *function,
                    active: a,
                    value,
                };
                guard.function.set_active_parameter(a, value + step)?;
                guard.function.apply_ties()?;
                guard.function.evaluate(x, &mut shifted)?;
            }
            for (row, (&hi, &lo)) in shifted.iter().zip(&base).enumerate() {
                jac.set(row, declared, (hi - lo) / step);
            }
        }
        Ok(())
    }
}
