//! Tests for the optimizer adapter: residuals, Jacobians, penalties and the
//! numerical derivative fallback.

use approx::assert_relative_eq;
use fitcore::error::{FitError, Result};
use fitcore::function::{CompositeFunction, ModelFunction, UserFunction};
use fitcore::models::{ExpDecay, FlatBackground, Gaussian};
use fitcore::parameters::BoundaryConstraint;
use fitcore::{FitData, OptimizerAdapter};
use ndarray::Array2;

use crate::test_helpers::linspace;

/// Forward-difference Jacobian of the adapter's residual.
fn finite_difference(adapter: &mut OptimizerAdapter<'_>, at: &[f64]) -> Array2<f64> {
    let base = adapter.residual(at).unwrap();
    let mut jac = Array2::zeros((base.len(), at.len()));
    for k in 0..at.len() {
        let h = 1e-7 * at[k].abs().max(1.0);
        let mut moved = at.to_vec();
        moved[k] += h;
        let r = adapter.residual(&moved).unwrap();
        for i in 0..base.len() {
            jac[[i, k]] = (r[i] - base[i]) / h;
        }
    }
    jac
}

#[test]
fn test_failing_derivative_falls_back_to_numerical() -> Result<()> {
    let mut f = UserFunction::new("Scale", |p, x, out| {
        for (o, &xi) in out.iter_mut().zip(x) {
            *o = p[0] * xi;
        }
        Ok(())
    })
    .with_parameter("a", 2.0)
    .with_derivative(|_, _, _| Err(FitError::NotImplemented("no derivative".to_string())))
    .build()?;
    assert!(f.has_analytic_derivative());

    let x = linspace(-2.0, 3.0, 11);
    let data = FitData::new(x.clone(), vec![0.0; 11])?;
    let mut adapter = OptimizerAdapter::new(&mut f, &data);
    let jac = adapter.residual_jacobian(&[2.0])?;
    assert_eq!(jac.dim(), (11, 1));
    for (row, &xi) in x.iter().enumerate() {
        assert_relative_eq!(jac[[row, 0]], xi, epsilon = 1e-9, max_relative = 1e-6);
    }
    Ok(())
}

#[test]
fn test_mixed_analytic_and_numerical_jacobian() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(ExpDecay::new())?;
    composite.add_child(FlatBackground::new())?;

    let x = linspace(0.0, 4.0, 30);
    let y = x.iter().map(|x| x.sin()).collect();
    let data = FitData::new(x, y)?;
    let mut adapter = OptimizerAdapter::new(&mut composite, &data);
    assert_eq!(adapter.n_active(), 6);

    let at = [1.5, 1.0, 0.8, 2.0, 1.3, 0.1];
    let jac = adapter.residual_jacobian(&at)?;
    let numeric = finite_difference(&mut adapter, &at);
    assert_eq!(jac.dim(), numeric.dim());
    for (&a, &n) in jac.iter().zip(numeric.iter()) {
        assert_relative_eq!(a, n, epsilon = 1e-3);
    }
    Ok(())
}

#[test]
fn test_weights_scale_rows() -> Result<()> {
    let mut g = Gaussian::new();
    let x = linspace(-1.0, 1.0, 5);
    let weights = vec![1.0, 4.0, 9.0, 16.0, 25.0];
    let plain = FitData::new(x.clone(), vec![0.5; 5])?;
    let weighted = plain.clone().with_weights(weights)?;

    let (r0, j0) = {
        let mut adapter = OptimizerAdapter::new(&mut g, &plain);
        (adapter.residual(&[1.0, 0.0, 1.0])?, adapter.residual_jacobian(&[1.0, 0.0, 1.0])?)
    };
    let mut adapter = OptimizerAdapter::new(&mut g, &weighted);
    let r1 = adapter.residual(&[1.0, 0.0, 1.0])?;
    let j1 = adapter.residual_jacobian(&[1.0, 0.0, 1.0])?;
    for row in 0..5 {
        let s = (row + 1) as f64;
        assert_relative_eq!(r1[row], s * r0[row]);
        for col in 0..3 {
            assert_relative_eq!(j1[[row, col]], s * j0[[row, col]]);
        }
    }
    Ok(())
}

#[test]
fn test_penalty_broadcast() -> Result<()> {
    let x = linspace(-3.0, 3.0, 25);
    let data = FitData::new(x, vec![0.0; 25])?;
    let at = [3.0, 0.0, 1.0];

    let mut free = Gaussian::new();
    let (r_free, j_free) = {
        let mut adapter = OptimizerAdapter::new(&mut free, &data);
        (adapter.residual(&at)?, adapter.residual_jacobian(&at)?)
    };

    let mut bounded = Gaussian::new();
    bounded.add_constraint(0, BoundaryConstraint::upper_bound(1.0)?)?;
    assert_relative_eq!(bounded.penalty(), 0.0);
    let mut adapter = OptimizerAdapter::new(&mut bounded, &data);
    let r = adapter.residual(&at)?;
    let j = adapter.residual_jacobian(&at)?;
    assert_relative_eq!(adapter.function().penalty(), 4000.0);

    for row in 0..25 {
        assert_relative_eq!(r[row] - r_free[row], 4000.0, max_relative = 1e-12);
        let expected = if [0, 9, 19, 24].contains(&row) { 4000.0 } else { 0.0 };
        assert_relative_eq!(j[[row, 0]] - j_free[[row, 0]], expected, epsilon = 1e-9);
        assert_relative_eq!(j[[row, 1]], j_free[[row, 1]]);
        assert_relative_eq!(j[[row, 2]], j_free[[row, 2]]);
    }
    Ok(())
}

#[test]
fn test_penalty_ignores_fixed_parameters() -> Result<()> {
    let mut g = Gaussian::new();
    g.set_parameter(0, 3.0, true)?;
    g.add_constraint(0, BoundaryConstraint::upper_bound(1.0)?)?;
    g.fix("Height")?;
    assert_relative_eq!(g.penalty(), 0.0);

    let data = FitData::new(vec![0.0, 1.0], vec![0.0, 0.0])?;
    let mut adapter = OptimizerAdapter::new(&mut g, &data);
    assert_eq!(adapter.residual_jacobian(&[0.0, 1.0])?.dim(), (2, 2));
    Ok(())
}

#[test]
fn test_evaluation_errors_propagate() -> Result<()> {
    let mut decay = ExpDecay::new();
    let data = FitData::new(vec![0.0, 1.0], vec![1.0, 0.5])?;
    let mut adapter = OptimizerAdapter::new(&mut decay, &data);
    assert!(matches!(
        adapter.residual(&[1.0, 0.0]),
        Err(FitError::FunctionEvaluation(_))
    ));
    assert!(adapter.residual(&[1.0, 1.0]).is_ok());
    assert!(matches!(
        adapter.residual(&[1.0]),
        Err(FitError::DimensionMismatch(_))
    ));
    Ok(())
}
