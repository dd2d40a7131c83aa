//! Tests for the text form of function trees and the factory parser.

use approx::assert_relative_eq;
use fitcore::error::Result;
use fitcore::function::{CompositeFunction, FunctionFactory, ModelFunction};
use fitcore::models::{
    ExpDecay, FlatBackground, Gaussian, LinearBackground, Lorentzian, Polynomial,
};
use fitcore::parameters::BoundaryConstraint;

use crate::test_helpers::sum_of_parameters;

/// Parse `function.as_string()` and compare the result with `function`.
fn assert_round_trip(
    factory: &FunctionFactory,
    function: &dyn ModelFunction,
) -> Box<dyn ModelFunction> {
    let text = function.as_string();
    let parsed = factory.parse(&text).unwrap();
    assert_eq!(parsed.is_composite(), function.is_composite(), "{}", text);
    assert_eq!(parsed.n_params(), function.n_params(), "{}", text);
    assert_eq!(parsed.n_active(), function.n_active(), "{}", text);
    for i in 0..function.n_params() {
        assert_eq!(parsed.parameter_name(i).unwrap(), function.parameter_name(i).unwrap());
        assert_relative_eq!(parsed.parameter(i).unwrap(), function.parameter(i).unwrap());
        assert_eq!(parsed.active_index(i).unwrap(), function.active_index(i).unwrap());
        assert_eq!(parsed.is_fixed(i).unwrap(), function.is_fixed(i).unwrap());
        assert_eq!(
            parsed.is_explicitly_set(i).unwrap(),
            function.is_explicitly_set(i).unwrap(),
            "{}",
            text
        );
        assert_eq!(
            parsed.constraint_of(i).unwrap(),
            function.constraint_of(i).unwrap()
        );
        assert_eq!(
            parsed.tie_of(i).unwrap().is_some(),
            function.tie_of(i).unwrap().is_some()
        );
    }
    assert_relative_eq!(parsed.penalty(), function.penalty());
    assert_eq!(parsed.as_string(), text);
    parsed
}

#[test]
fn test_leaf_string_form() -> Result<()> {
    let mut g = Gaussian::new();
    g.set_parameter_by_name("Height", 2.5)?;
    g.tie("PeakCentre", "0.5")?;
    g.add_constraint(2, BoundaryConstraint::bounded(0.1, 3.0)?)?;
    assert_eq!(
        g.as_string(),
        "name=Gaussian,Height=2.5,PeakCentre=0.5,ties=(PeakCentre=0.5),constraints=(0.1<Sigma<3)"
    );
    assert_round_trip(&FunctionFactory::new(), &g);
    Ok(())
}

#[test]
fn test_composite_string_form() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;
    composite.set_parameter_by_name("f0.Height", 10.0)?;
    composite.tie("f1.A0", "0.1*f0.Height")?;
    assert_eq!(
        composite.as_string(),
        "name=Gaussian,Height=10;name=FlatBackground;ties=(f1.A0=0.1*f0.Height)"
    );
    Ok(())
}

#[test]
fn test_nested_round_trip() -> Result<()> {
    let mut inner = CompositeFunction::new();
    inner.add_child(Lorentzian::new())?;
    inner.add_child(Gaussian::new())?;
    inner.tie("f1.PeakCentre", "f0.PeakCentre")?;

    let mut composite = CompositeFunction::new();
    composite.add_child(Polynomial::new(3))?;
    composite.add_child(inner)?;
    composite.add_child(ExpDecay::new())?;
    composite.add_child(LinearBackground::new())?;
    composite.set_parameter_by_name("f1.f0.PeakCentre", 1.5)?;
    composite.set_parameter_by_name("f2.Lifetime", 0.125)?;
    composite.tie("f1.f1.Sigma", "2*f0.A1 + f2.Height")?;
    composite.tie("f3.A1", "-f3.A0")?;
    composite.fix("f0.A3")?;
    composite.modify_child(3, |line| {
        line.add_constraint(0, BoundaryConstraint::lower_bound(-1.0)?)
    })?;
    composite.apply_ties()?;

    let text = composite.as_string();
    assert!(text.contains(";(name=Lorentzian,"), "{}", text);
    assert!(text.contains("ties=(f1.PeakCentre=f0.PeakCentre)"), "{}", text);
    assert!(text.ends_with("ties=(f1.f1.Sigma=2*f0.A1+f2.Height)"), "{}", text);

    let parsed = assert_round_trip(&FunctionFactory::new(), &composite);
    assert_eq!(parsed.constraints().count(), 1);
    Ok(())
}

#[test]
fn test_empty_and_single_child_composites() -> Result<()> {
    let factory = FunctionFactory::new();
    let empty = CompositeFunction::new();
    assert_eq!(empty.as_string(), "");
    assert_round_trip(&factory, &empty);

    let mut single = CompositeFunction::new();
    single.add_child(FlatBackground::new())?;
    assert_eq!(single.as_string(), "name=FlatBackground;");
    assert_round_trip(&factory, &single);

    let mut wrapper = CompositeFunction::new();
    wrapper.add_child(CompositeFunction::new())?;
    wrapper.add_child(single)?;
    assert_eq!(wrapper.as_string(), "();(name=FlatBackground;);");
    assert_round_trip(&factory, &wrapper);
    Ok(())
}

#[test]
fn test_registered_user_function() -> Result<()> {
    let mut factory = FunctionFactory::new();
    factory.register("Sum", || Box::new(sum_of_parameters("Sum", 2)));

    let mut composite = CompositeFunction::new();
    composite.add_child(sum_of_parameters("Sum", 2))?;
    composite.add_child(Gaussian::new())?;
    composite.tie("f0.p1", "f1.Sigma/2")?;

    let parsed = assert_round_trip(&factory, &composite);
    assert_relative_eq!(parsed.parameter_by_name("f0.p1")?, 0.5);
    assert!(FunctionFactory::new().parse(&composite.as_string()).is_err());
    Ok(())
}

#[test]
fn test_penalty_factor_survives_round_trip() -> Result<()> {
    let mut g = Gaussian::new();
    g.set_parameter_by_name("Height", 3.0)?;
    g.add_constraint(0, BoundaryConstraint::upper_bound(1.0)?.with_penalty_factor(5.0)?)?;
    g.add_constraint(2, BoundaryConstraint::lower_bound(2.0)?)?;
    assert_eq!(
        g.as_string(),
        "name=Gaussian,Height=3,constraints=(Height<1,Height.penalty=5,2<Sigma)"
    );
    assert_relative_eq!(g.penalty(), 5.0 * 4.0 + 1000.0);

    let parsed = assert_round_trip(&FunctionFactory::new(), &g);
    assert_relative_eq!(parsed.constraint_of(0)?.map(|c| c.penalty_factor()).unwrap(), 5.0);
    Ok(())
}

#[test]
fn test_explicit_flags_survive_round_trip() -> Result<()> {
    let mut g = Gaussian::new();
    g.set_parameter_by_name("Height", 2.0)?;
    g.set_parameter_default(1, 0.4)?;
    // the solver writes active values without marking them explicit
    g.set_active_parameter(2, 0.7)?;
    g.fix("PeakCentre")?;
    assert_eq!(
        g.as_string(),
        "name=Gaussian,Height=2,implicit=(PeakCentre=0.4,Sigma=0.7),ties=(PeakCentre=0.4)"
    );

    let mut parsed = assert_round_trip(&FunctionFactory::new(), &g);
    parsed.set_parameter_default(0, 9.0)?;
    parsed.set_parameter_default(2, 1.5)?;
    assert_relative_eq!(parsed.parameter(0)?, 2.0);
    assert_relative_eq!(parsed.parameter(2)?, 1.5);
    Ok(())
}

#[test]
fn test_parse_tolerates_whitespace() -> Result<()> {
    let parsed = FunctionFactory::new().parse(
        " name=Gaussian, Height=4 ; name=FlatBackground, A0=0.5 ; ties=( f1.A0 = f0.Height/8 ) ",
    )?;
    assert_eq!(parsed.n_active(), 3);
    assert_relative_eq!(parsed.parameter_by_name("f1.A0")?, 0.5);
    Ok(())
}
