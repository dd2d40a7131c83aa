//! Tests for ties: active-space bookkeeping, propagation across children,
//! and cleanup when functions leave the tree.

use approx::assert_relative_eq;
use fitcore::error::{FitError, Result};
use fitcore::function::{CompositeFunction, ModelFunction};
use fitcore::models::{FlatBackground, Gaussian, LinearBackground};
use fitcore::parameters::{ParameterReference, Tie};

use crate::test_helpers::sum_of_parameters;

#[test]
fn test_tie_removes_parameter_from_active_space() -> Result<()> {
    let mut leaf = sum_of_parameters("Sum", 3);
    assert_eq!(leaf.n_active(), 3);

    leaf.tie("p1", "2*p0")?;
    assert_eq!(leaf.n_active(), 2);
    assert_eq!(leaf.active_index(1)?, None);
    assert_eq!(leaf.active_index(0)?, Some(0));
    assert_eq!(leaf.active_index(2)?, Some(1));
    assert_eq!(leaf.index_of_active(1)?, 2);
    assert_relative_eq!(leaf.parameter(1)?, 2.0);

    assert!(leaf.untie("p1")?);
    assert!(!leaf.untie("p1")?);
    assert_eq!(leaf.n_active(), 3);
    assert_eq!(leaf.active_index(1)?, Some(1));
    Ok(())
}

#[test]
fn test_constant_tie_fixes() -> Result<()> {
    let mut g = Gaussian::new();
    g.tie("Sigma", "0.25")?;
    assert!(g.is_fixed(2)?);
    assert!(g.tie_of(2)?.is_none());
    assert_relative_eq!(g.parameter(2)?, 0.25);
    assert_eq!(g.n_active(), 2);
    Ok(())
}

#[test]
fn test_tie_across_children_follows_update() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;
    composite.tie("f1.A0", "0.1*f0.Height")?;
    assert_eq!(composite.n_active(), 3);
    assert_eq!(composite.table().active_offset(1)?, 3);

    composite.update_active(&[50.0, 1.0, 2.0])?;
    assert_relative_eq!(composite.parameter_by_name("f1.A0")?, 5.0);

    // the tie lives in the child that owns the target
    assert!(composite.child(1)?.tie_of(0)?.is_some());
    Ok(())
}

#[test]
fn test_ties_are_a_single_pass() -> Result<()> {
    let mut leaf = sum_of_parameters("Sum", 3);
    leaf.tie("p1", "p0 + 1")?;
    leaf.tie("p2", "p1 * 10")?;

    leaf.update_active(&[5.0])?;
    assert_relative_eq!(leaf.parameter(1)?, 6.0);
    // p2 saw p1 as it was before this pass
    assert_relative_eq!(leaf.parameter(2)?, 20.0);

    leaf.apply_ties()?;
    assert_relative_eq!(leaf.parameter(2)?, 60.0);
    Ok(())
}

#[test]
fn test_tie_outside_tree_is_a_logic_error() {
    let outsider = Gaussian::new();
    let mut composite = CompositeFunction::new();
    composite.add_child(FlatBackground::new()).unwrap();

    let target = composite.parameter_reference(0).unwrap();
    let tie = Tie::parse(target, "2*h", |_| Ok(ParameterReference::new(outsider.id(), 0))).unwrap();
    assert!(matches!(composite.add_tie(tie), Err(FitError::LogicError(_))));
    assert_eq!(composite.n_active(), 1);

    let stray = Tie::parse(
        ParameterReference::new(outsider.id(), 0),
        "1+A0",
        |_| composite.parameter_reference(0),
    )
    .unwrap();
    assert!(matches!(composite.add_tie(stray), Err(FitError::LogicError(_))));
}

#[test]
fn test_removing_child_drops_ties_into_it() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;
    composite.add_child(FlatBackground::new())?;
    // child 0 reads child 1, child 2 reads child 1
    composite.tie("f0.Sigma", "f1.A0 + 1")?;
    composite.tie("f2.A0", "3*f1.A0")?;
    assert_eq!(composite.n_active(), 3);

    let removed = composite.remove_child(1)?;
    assert_eq!(removed.n_params(), 1);
    assert_eq!(composite.n_children(), 2);
    for i in 0..composite.n_params() {
        assert!(composite.tie_of(i)?.is_none());
        assert!(composite.is_active(i)?);
    }
    composite.apply_ties()?;
    assert_eq!(composite.n_active(), 4);
    Ok(())
}

#[test]
fn test_replacing_child_drops_ties_into_it() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;
    composite.tie("f0.Sigma", "f1.A0 + 1")?;
    assert_eq!(composite.n_active(), 3);

    composite.replace_child(1, LinearBackground::new())?;
    assert_eq!(composite.n_params(), 5);
    assert_eq!(composite.n_active(), 5);
    assert!(composite.tie_of(2)?.is_none());
    assert_eq!(composite.active_index(2)?, Some(2));
    assert_eq!(composite.table().active_offset(1)?, 3);

    // Sigma keeps the value the dropped tie last gave it
    composite.set_parameter_by_name("f1.A0", 7.0)?;
    composite.apply_ties()?;
    assert_relative_eq!(composite.parameter_by_name("f0.Sigma")?, 1.0);
    Ok(())
}

#[test]
fn test_removed_child_loses_ties_out_of_it() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;
    composite.tie("f1.A0", "0.1*f0.Height")?;

    let mut removed = composite.remove_child(1)?;
    assert!(removed.tie_of(0)?.is_none());
    assert_eq!(removed.n_active(), 1);
    removed.apply_ties()?;
    composite.apply_ties()?;
    assert_eq!(composite.n_active(), 3);
    Ok(())
}

#[test]
fn test_subtree_with_outside_tie_evaluated_alone() -> Result<()> {
    let mut inner = CompositeFunction::new();
    inner.add_child(FlatBackground::new())?;
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(inner)?;
    composite.tie("f1.f0.A0", "f0.Height + 1")?;
    assert_relative_eq!(composite.parameter_by_name("f1.f0.A0")?, 2.0);

    // the inner composite cannot see f0, so its own tie pass leaves A0 alone
    composite.modify_child(1, |inner| {
        inner.set_parameter(0, 9.0, true)?;
        inner.apply_ties()
    })?;
    assert_relative_eq!(composite.parameter_by_name("f1.f0.A0")?, 9.0);

    composite.apply_ties()?;
    assert_relative_eq!(composite.parameter_by_name("f1.f0.A0")?, 2.0);
    Ok(())
}

#[test]
fn test_fix_and_unfix_by_name() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.fix("f0.PeakCentre")?;
    assert_eq!(composite.n_active(), 2);
    assert!(composite.is_fixed(1)?);
    composite.update_active(&[3.0, 0.5])?;
    assert_relative_eq!(composite.parameter(2)?, 0.5);

    composite.unfix("f0.PeakCentre")?;
    assert_eq!(composite.active_values()?, vec![3.0, 0.0, 0.5]);
    Ok(())
}
