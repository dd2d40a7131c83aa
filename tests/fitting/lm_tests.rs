//! End-to-end fits of function trees with the Levenberg-Marquardt solver.

use approx::assert_relative_eq;
use fitcore::error::Result;
use fitcore::function::{CompositeFunction, FunctionFactory, ModelFunction};
use fitcore::models::{ExpDecay, FlatBackground, Gaussian};
use fitcore::parameters::BoundaryConstraint;
use fitcore::{fit, fit_many, FitData, LevenbergMarquardt, LmConfig, OptimizerAdapter};

use crate::test_helpers::{linspace, noisy_data};

fn gaussian(x: f64, height: f64, centre: f64, sigma: f64) -> f64 {
    height * (-0.5 * ((x - centre) / sigma).powi(2)).exp()
}

fn peak_on_background() -> Result<CompositeFunction> {
    let mut model = CompositeFunction::new();
    model.add_child(Gaussian::new())?;
    model.add_child(FlatBackground::new())?;
    model.set_parameter_by_name("f0.Height", 4.0)?;
    model.set_parameter_by_name("f0.PeakCentre", 0.1)?;
    model.set_parameter_by_name("f0.Sigma", 1.0)?;
    Ok(model)
}

#[test]
fn test_fit_peak_on_background() -> Result<()> {
    let data = noisy_data(linspace(-4.0, 4.0, 200), 0.01, 11, |x| {
        gaussian(x, 5.0, 0.3, 0.7) + 0.2
    });
    let mut model = peak_on_background()?;

    let result = fit(&mut model, &data, &LmConfig::default())?;
    assert!(result.success, "{}", result);
    assert_relative_eq!(model.parameter_by_name("f0.Height")?, 5.0, epsilon = 0.02);
    assert_relative_eq!(model.parameter_by_name("f0.PeakCentre")?, 0.3, epsilon = 0.01);
    assert_relative_eq!(model.parameter_by_name("f0.Sigma")?, 0.7, epsilon = 0.01);
    assert_relative_eq!(model.parameter_by_name("f1.A0")?, 0.2, epsilon = 0.01);
    assert_eq!(result.active_values, model.active_values()?);
    // noise variance is 1e-4
    assert!(result.reduced_chi_squared < 2e-4, "{}", result);
    Ok(())
}

#[test]
fn test_fit_respects_fixed_and_tied() -> Result<()> {
    let data = noisy_data(linspace(-5.0, 5.0, 300), 0.005, 3, |x| {
        gaussian(x, 2.0, -1.5, 0.5) + gaussian(x, 3.0, 1.5, 0.5) + 0.1
    });

    let mut model = CompositeFunction::new();
    model.add_child(Gaussian::new())?;
    model.add_child(Gaussian::new())?;
    model.add_child(FlatBackground::new())?;
    model.set_parameter_by_name("f0.PeakCentre", -1.2)?;
    model.set_parameter_by_name("f1.PeakCentre", 1.2)?;
    model.set_parameter_by_name("f0.Sigma", 0.8)?;
    model.tie("f1.Sigma", "f0.Sigma")?;
    model.tie("f2.A0", "0.1")?;
    assert_eq!(model.n_active(), 5);

    let result = fit(&mut model, &data, &LmConfig::default())?;
    assert!(result.success, "{}", result);
    assert_eq!(result.active_values.len(), 5);
    assert_relative_eq!(model.parameter_by_name("f2.A0")?, 0.1);
    assert_relative_eq!(
        model.parameter_by_name("f1.Sigma")?,
        model.parameter_by_name("f0.Sigma")?
    );
    assert_relative_eq!(model.parameter_by_name("f0.Sigma")?, 0.5, epsilon = 0.01);
    assert_relative_eq!(model.parameter_by_name("f1.Height")?, 3.0, epsilon = 0.02);
    Ok(())
}

#[test]
fn test_fit_with_numerical_derivatives() -> Result<()> {
    let x = linspace(0.0, 5.0, 60);
    let y = x.iter().map(|x| 3.0 * (-x / 1.7).exp()).collect();
    let data = FitData::new(x, y)?.with_errors(vec![0.01; 60])?;

    let mut decay = ExpDecay::new();
    decay.set_parameter_by_name("Lifetime", 1.0)?;
    let result = fit(&mut decay, &data, &LmConfig::default())?;
    assert!(result.success, "{}", result);
    assert_relative_eq!(decay.parameter_by_name("Height")?, 3.0, epsilon = 1e-4);
    assert_relative_eq!(decay.parameter_by_name("Lifetime")?, 1.7, epsilon = 1e-4);
    Ok(())
}

#[test]
fn test_constraint_holds_parameter_near_bound() -> Result<()> {
    let data = noisy_data(linspace(-3.0, 3.0, 100), 0.01, 5, |x| gaussian(x, 5.0, 0.0, 0.6));
    let mut model = Gaussian::new();
    model.set_parameter_by_name("Height", 2.0)?;
    model.set_parameter_by_name("Sigma", 0.8)?;
    model.add_constraint(0, BoundaryConstraint::upper_bound(3.0)?)?;

    fit(&mut model, &data, &LmConfig::default())?;
    let height = model.parameter_by_name("Height")?;
    assert!(height > 2.5 && height < 3.2, "height {}", height);
    Ok(())
}

#[test]
fn test_fit_many_uses_independent_copies() -> Result<()> {
    let heights = [1.0, 2.0, 3.0, 4.0, 5.0];
    let datasets: Vec<FitData> = heights
        .iter()
        .enumerate()
        .map(|(k, &h)| {
            noisy_data(linspace(-3.0, 3.0, 80), 0.01, 100 + k as u64, move |x| {
                gaussian(x, h, 0.3, 0.7) + 0.2
            })
        })
        .collect();
    let model = peak_on_background()?;
    let before = model.as_string();

    let results = fit_many(&model, &datasets, &LmConfig::default());
    assert_eq!(results.len(), heights.len());
    for (result, &h) in results.into_iter().zip(heights.iter()) {
        let (fitted, summary) = result?;
        assert!(summary.success, "{}", summary);
        assert_relative_eq!(fitted.parameter_by_name("f0.Height")?, h, epsilon = 0.03);
    }
    assert_eq!(model.as_string(), before);
    Ok(())
}

#[test]
fn test_fit_parsed_model_with_json_config() -> Result<()> {
    let config = LmConfig::from_json(r#"{ "max_iterations": 200, "calc_jacobian": true }"#)?;
    let mut model = FunctionFactory::new().parse(
        "name=Lorentzian,Amplitude=1,PeakCentre=0.5,FWHM=1.5;name=FlatBackground,A0=0",
    )?;
    let data = noisy_data(linspace(-4.0, 4.0, 150), 0.002, 9, |x| {
        let g = 0.4;
        2.0 / std::f64::consts::PI * g / ((x - 0.2).powi(2) + g * g) + 0.05
    });

    let result = fit(model.as_mut(), &data, &config)?;
    assert!(result.success, "{}", result);
    assert_relative_eq!(model.parameter_by_name("f0.Amplitude")?, 2.0, epsilon = 0.02);
    assert_relative_eq!(model.parameter_by_name("f0.FWHM")?, 0.8, epsilon = 0.01);
    Ok(())
}

#[test]
fn test_solver_drives_adapter_directly() -> Result<()> {
    let x = linspace(0.0, 2.0, 20);
    let y = x.iter().map(|x| 1.0 + 0.5 * x).collect();
    let data = FitData::new(x, y)?;
    let mut model = FunctionFactory::new().parse("name=LinearBackground,A0=0,A1=0")?;

    let mut adapter = OptimizerAdapter::new(model.as_mut(), &data);
    let start = adapter.active_values()?;
    let result = LevenbergMarquardt::new()
        .with_calc_jacobian(true)
        .minimize(&mut adapter, start)?;
    assert!(result.success, "{}", result);
    assert_relative_eq!(result.params[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(result.params[1], 0.5, epsilon = 1e-6);
    assert_eq!(result.jacobian.map(|j| j.dim()), Some((20, 2)));
    Ok(())
}
