//! Peak shapes.
//!
//! These are widely used in spectroscopy and diffraction, usually summed
//! with a background inside a composite function.

use std::f64::consts::PI;

use crate::error::Result;
use crate::function::{Jacobian, Leaf, LeafBody};
use crate::parameters::ParameterSpec;

/// A Gaussian peak.
///
/// f(x) = Height * exp(-(x - PeakCentre)² / (2 * Sigma²))
///
/// The full width at half maximum is 2 * sqrt(2 * ln 2) * Sigma ≈ 2.3548 * Sigma.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gaussian;

impl Gaussian {
    /// A Gaussian leaf with unit height and width centred on zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Leaf<Gaussian> {
        Leaf::new(Gaussian)
    }
}

impl LeafBody for Gaussian {
    fn name(&self) -> &str {
        "Gaussian"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("Height", 1.0).with_description("Peak height"),
            ParameterSpec::new("PeakCentre", 0.0).with_description("Position of the maximum"),
            ParameterSpec::new("Sigma", 1.0).with_description("Standard deviation"),
        ]
    }

    fn function(&self, p: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        let (height, centre, sigma) = (p[0], p[1], p[2]);
        let w = 0.5 / (sigma * sigma);
        for (o, &xi) in out.iter_mut().zip(x) {
            let d = xi - centre;
            *o = height * (-w * d * d).exp();
        }
        Ok(())
    }

    fn derivative(&self, p: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        let (height, centre, sigma) = (p[0], p[1], p[2]);
        let s2 = sigma * sigma;
        for (row, &xi) in x.iter().enumerate() {
            let d = xi - centre;
            let e = (-0.5 * d * d / s2).exp();
            jac.set(row, 0, e);
            jac.set(row, 1, height * e * d / s2);
            jac.set(row, 2, height * e * d * d / (s2 * sigma));
        }
        Ok(())
    }

    fn has_derivative(&self) -> bool {
        true
    }
}

/// A Lorentzian peak, normalized so its integral equals Amplitude.
///
/// f(x) = Amplitude / π * (FWHM / 2) / ((x - PeakCentre)² + (FWHM / 2)²)
#[derive(Debug, Clone, Copy, Default)]
pub struct Lorentzian;

impl Lorentzian {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Leaf<Lorentzian> {
        Leaf::new(Lorentzian)
    }
}

impl LeafBody for Lorentzian {
    fn name(&self) -> &str {
        "Lorentzian"
    }

    fn parameters(&self) -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::new("Amplitude", 1.0).with_description("Integrated intensity"),
            ParameterSpec::new("PeakCentre", 0.0).with_description("Position of the maximum"),
            ParameterSpec::new("FWHM", 1.0).with_description("Full width at half maximum"),
        ]
    }

    fn function(&self, p: &[f64], x: &[f64], out: &mut [f64]) -> Result<()> {
        let (amplitude, centre, g) = (p[0], p[1], 0.5 * p[2]);
        for (o, &xi) in out.iter_mut().zip(x) {
            let d = xi - centre;
            *o = amplitude / PI * g / (d * d + g * g);
        }
        Ok(())
    }

    fn derivative(&self, p: &[f64], x: &[f64], jac: &mut dyn Jacobian) -> Result<()> {
        let (amplitude, centre, g) = (p[0], p[1], 0.5 * p[2]);
        for (row, &xi) in x.iter().enumerate() {
            let d = xi - centre;
            let denom = d * d + g * g;
            jac.set(row, 0, g / (PI * denom));
            jac.set(row, 1, amplitude / PI * 2.0 * g * d / (denom * denom));
            jac.set(row, 2, amplitude / (2.0 * PI) * (d * d - g * g) / (denom * denom));
        }
        Ok(())
    }

    fn has_derivative(&self) -> bool {
        true
    }
}
