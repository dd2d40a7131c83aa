//! Tests for composite functions: offset bookkeeping, name addressing,
//! additive evaluation and Jacobian placement.

use approx::assert_relative_eq;
use fitcore::error::{FitError, IndexKind, Result};
use fitcore::function::{CompositeFunction, JacobianBuffer, ModelFunction};
use fitcore::models::{FlatBackground, Gaussian, LinearBackground, Polynomial};
use rand::Rng;

use crate::test_helpers::{rng, sentinel, sum_of_parameters};

/// Check every table offset against the children's own counts.
fn assert_offsets_consistent(composite: &CompositeFunction) {
    let table = composite.table();
    assert_eq!(table.n_children(), composite.n_children());
    let (mut declared, mut active) = (0, 0);
    for (k, child) in composite.children().enumerate() {
        assert_eq!(table.declared_offset(k).unwrap(), declared);
        assert_eq!(table.active_offset(k).unwrap(), active);
        assert_eq!(table.child_counts(k).unwrap(), (child.n_params(), child.n_active()));
        declared += child.n_params();
        active += child.n_active();
    }
    assert_eq!(composite.n_params(), declared);
    assert_eq!(composite.n_active(), active);
}

#[test]
fn test_offsets_survive_random_edits() -> Result<()> {
    let mut rng = rng(7);
    let mut composite = CompositeFunction::new();

    for step in 0..200 {
        let n = composite.n_children();
        match rng.gen_range(0..7) {
            0 | 1 => {
                let size = rng.gen_range(0..4);
                composite.add_child(sum_of_parameters(&format!("Sum{}", step), size))?;
            }
            2 if n > 0 => {
                composite.remove_child(rng.gen_range(0..n))?;
            }
            3 if n > 0 => {
                let size = rng.gen_range(0..4);
                let replacement = sum_of_parameters("Replacement", size);
                composite.replace_child(rng.gen_range(0..n), replacement)?;
            }
            4 if composite.n_params() > 0 => {
                let i = rng.gen_range(0..composite.n_params());
                if composite.is_fixed(i)? {
                    composite.restore_active(i)?;
                } else {
                    composite.remove_active(i)?;
                }
            }
            5 if composite.n_params() > 1 => {
                let n = composite.n_params();
                let target = rng.gen_range(0..n);
                let source = (target + rng.gen_range(1..n)) % n;
                let target = composite.parameter_name(target)?;
                let source = composite.parameter_name(source)?;
                composite.tie(&target, &format!("{} + 1", source))?;
            }
            6 if composite.n_params() > 0 => {
                composite.remove_tie(rng.gen_range(0..composite.n_params()))?;
            }
            _ => {}
        }
        assert_offsets_consistent(&composite);
    }
    Ok(())
}

#[test]
fn test_child_index_out_of_range() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.add_child(FlatBackground::new())?;

    for result in [
        composite.remove_child(2).map(|_| ()),
        composite.replace_child(2, FlatBackground::new()),
        composite.replace_child(5, FlatBackground::new()),
    ] {
        assert!(matches!(
            result,
            Err(FitError::IndexOutOfRange {
                kind: IndexKind::Child,
                index,
                len: 2,
            }) if index >= 2
        ));
    }
    assert!(matches!(
        composite.child(2),
        Err(FitError::IndexOutOfRange {
            kind: IndexKind::Child,
            ..
        })
    ));
    assert_eq!(composite.n_children(), 2);
    assert_eq!(composite.n_params(), 4);
    Ok(())
}

#[test]
fn test_active_indices_follow_declared_order() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(sum_of_parameters("A", 3))?;
    composite.add_child(sum_of_parameters("B", 2))?;

    composite.remove_active(1)?;
    composite.remove_active(3)?;
    assert_eq!(composite.n_active(), 3);
    let declared: Vec<usize> = (0..3).map(|a| composite.index_of_active(a).unwrap()).collect();
    assert_eq!(declared, vec![0, 2, 4]);

    composite.restore_active(1)?;
    let declared: Vec<usize> = (0..4).map(|a| composite.index_of_active(a).unwrap()).collect();
    assert_eq!(declared, vec![0, 1, 2, 4]);
    assert_eq!(composite.active_index(3)?, None);
    assert_eq!(composite.active_index(4)?, Some(3));
    assert_offsets_consistent(&composite);
    Ok(())
}

#[test]
fn test_set_and_get_every_name() -> Result<()> {
    let mut inner = CompositeFunction::new();
    inner.add_child(Gaussian::new())?;
    inner.add_child(LinearBackground::new())?;

    let mut composite = CompositeFunction::new();
    composite.add_child(Polynomial::new(3))?;
    composite.add_child(inner)?;
    composite.add_child(FlatBackground::new())?;
    assert_eq!(composite.n_params(), 4 + 5 + 1);

    for i in 0..composite.n_params() {
        let name = composite.parameter_name(i)?;
        assert_eq!(composite.parameter_index_of(&name)?, i);
        let value = 0.25 * i as f64 - 1.0;
        composite.set_parameter_by_name(&name, value)?;
        assert_eq!(composite.parameter_by_name(&name)?, value);
        assert!(composite.is_explicitly_set(i)?);
    }
    assert_eq!(composite.parameter_name(5)?, "f1.f0.PeakCentre");
    Ok(())
}

#[test]
fn test_malformed_names() {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new()).unwrap();

    for name in ["Height", "f0.", "g0.Height", "f.Height", "fx.Height", "f-1.Height"] {
        assert!(
            matches!(composite.parameter_index_of(name), Err(FitError::InvalidArgument(_))),
            "{} should be rejected",
            name
        );
    }
    assert!(matches!(
        composite.parameter_index_of("f3.Height"),
        Err(FitError::IndexOutOfRange {
            kind: IndexKind::Child,
            ..
        })
    ));
    assert!(composite.set_parameter_by_name("f0.Width", 1.0).is_err());
}

#[test]
fn test_explicit_flag_reaches_children() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    composite.set_parameter(2, 0.5, true)?;
    composite.set_parameter_default(2, 3.0)?;
    composite.set_parameter_default(0, 3.0)?;
    assert_eq!(composite.parameter(2)?, 0.5);
    assert_eq!(composite.parameter(0)?, 3.0);
    assert!(!composite.is_explicitly_set(0)?);
    assert!(composite.child(0)?.is_explicitly_set(2)?);
    Ok(())
}

#[test]
fn test_sum_of_constants() -> Result<()> {
    let mut a = FlatBackground::new();
    a.set_parameter(0, 2.0, true)?;
    let mut b = FlatBackground::new();
    b.set_parameter(0, 3.0, true)?;

    let mut composite = CompositeFunction::new();
    composite.add_child(a)?;
    composite.add_child(b)?;

    let mut out = [0.0; 4];
    composite.evaluate(&[-1.0, 0.0, 1.0, 100.0], &mut out)?;
    assert_eq!(out, [5.0; 4]);
    Ok(())
}

#[test]
fn test_sum_matches_children() -> Result<()> {
    let mut g = Gaussian::new();
    g.update_active(&[2.0, 0.3, 0.6])?;
    let mut line = LinearBackground::new();
    line.update_active(&[0.5, -0.2])?;

    let x = [-1.0, 0.0, 0.5, 2.0];
    let (mut gy, mut ly) = ([0.0; 4], [0.0; 4]);
    g.evaluate(&x, &mut gy)?;
    line.evaluate(&x, &mut ly)?;

    let mut composite = CompositeFunction::new();
    composite.add_child(g)?;
    composite.add_child(line)?;
    let mut out = [0.0; 4];
    composite.evaluate(&x, &mut out)?;
    for k in 0..4 {
        assert_relative_eq!(out[k], gy[k] + ly[k]);
    }
    Ok(())
}

#[test]
fn test_empty_composite_evaluates_to_zero() -> Result<()> {
    let composite = CompositeFunction::new();
    let mut out = [7.0; 3];
    composite.evaluate(&[1.0, 2.0, 3.0], &mut out)?;
    assert_eq!(out, [0.0; 3]);
    Ok(())
}

#[test]
fn test_child_jacobians_do_not_overlap() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(sentinel("A", 2, 10.0))?;
    composite.add_child(sentinel("B", 3, 20.0))?;

    let x = [0.0, 1.0, 2.0];
    let mut jac = JacobianBuffer::active(x.len(), &composite)?;
    composite.evaluate_derivative(&x, &mut jac)?;

    let matrix = jac.matrix();
    assert_eq!(matrix.dim(), (3, 5));
    for row in matrix.rows() {
        assert_eq!(row.to_vec(), vec![10.0, 11.0, 20.0, 21.0, 22.0]);
    }
    Ok(())
}

#[test]
fn test_nested_jacobian_skips_inactive_columns() -> Result<()> {
    let mut inner = CompositeFunction::new();
    inner.add_child(sentinel("B", 2, 20.0))?;
    inner.add_child(sentinel("C", 2, 30.0))?;

    let mut composite = CompositeFunction::new();
    composite.add_child(sentinel("A", 2, 10.0))?;
    composite.add_child(inner)?;
    // f1.f0.s1
    composite.remove_active(3)?;

    let mut jac = JacobianBuffer::active(2, &composite)?;
    composite.derive(&[0.0, 1.0], &mut jac)?;
    assert_eq!(jac.matrix().row(1).to_vec(), vec![10.0, 11.0, 20.0, 30.0, 31.0]);
    Ok(())
}

#[test]
fn test_clone_is_independent() -> Result<()> {
    let mut composite = CompositeFunction::new();
    composite.add_child(Gaussian::new())?;
    let mut copy = composite.clone_box();
    copy.set_parameter(0, 42.0, true)?;
    assert_eq!(composite.parameter(0)?, 1.0);
    assert_eq!(copy.id(), composite.id());
    assert!(composite.add_boxed_child(copy).is_err());
    Ok(())
}
