use approx::assert_abs_diff_eq;
use paganini_core::{eq, pow, seq, ucyc_with, Params, Specification, TuneError, Type, Variable};

fn value(v: &Variable) -> f64 {
    v.value().expect("variable should be tuned")
}

fn motzkin(size: f64) -> (Specification, Variable, Variable) {
    let mut spec = Specification::new();
    let z = spec.variable_with_target(size);
    let m = spec.variable();
    spec.add(&m, &z + &z * &m + &z * pow(&m, 2)).unwrap();
    (spec, z, m)
}

#[test]
fn motzkin_trees_of_expected_size() {
    let (spec, z, m) = motzkin(1000.0);
    spec.run_tuner(&m, None).unwrap();
    assert_abs_diff_eq!(value(&z), 0.333333083333, epsilon = 1e-9);
    assert_abs_diff_eq!(value(&m), 0.998501123876, epsilon = 1e-6);
}

#[test]
fn large_targets_approach_the_singularity() {
    let (spec, z, m) = motzkin(1000.0);
    spec.run_tuner(&m, Some(&Params::new(Type::Algebraic))).unwrap();
    assert!(value(&z) < 1.0 / 3.0);
    assert_abs_diff_eq!(value(&z), 1.0 / 3.0, epsilon = 1e-5);
}

#[test]
fn expectations_match_the_targets() {
    let (spec, z, m) = motzkin(1000.0);
    spec.run_tuner(&m, None).unwrap();
    let expected = spec.expectations(&m, None).unwrap();
    assert_eq!(expected.len(), 1);
    assert_eq!(expected[0].0, z);
    assert_abs_diff_eq!(expected[0].1, 1000.0, epsilon = 1e-1);
}

#[test]
fn lambda_terms_with_three_parameters() {
    let mut spec = Specification::new();
    let z = spec.variable_with_target(10000.0);
    let v = spec.variable_with_target(3120.0);
    let u = spec.variable_with_target(312.0);
    let l = spec.variable();
    let d = spec.variable();
    spec.add(&l, &d + &z * &l + &z * pow(&l, 2)).unwrap();
    spec.add(&d, &v * &z + &u * &z * &d).unwrap();
    spec.run_tuner(&l, None).unwrap();
    assert_abs_diff_eq!(value(&z), 0.356007431874485, epsilon = 1e-8);
    assert_abs_diff_eq!(value(&v), 0.743688207247, epsilon = 1e-6);
    assert_abs_diff_eq!(value(&u), 0.255357284061, epsilon = 1e-6);
    assert_abs_diff_eq!(value(&l), 0.904320092780, epsilon = 1e-5);
    assert_abs_diff_eq!(value(&d), 0.291234381655, epsilon = 1e-5);

    for (var, mean) in spec.expectations(&l, None).unwrap() {
        let target = var.target().unwrap();
        assert_abs_diff_eq!(mean, target, epsilon = 1e-4 * target);
    }
}

#[test]
fn cycles_of_compositions_with_fixed_length() {
    let mut spec = Specification::new();
    let z = spec.variable_with_target(20.0);
    let c = spec.variable();
    spec.add(&c, ucyc_with(&z * seq(&z), eq(12))).unwrap();
    spec.run_tuner(&c, Some(&Params::new(Type::Rational))).unwrap();
    assert_abs_diff_eq!(value(&z), 0.405765659264, epsilon = 1e-8);
    assert!(value(&c) > 0.0);
}

#[test]
fn unreachable_targets_leave_every_variable_unset() {
    // Every non-empty Motzkin tree has at least one node.
    let (spec, z, m) = motzkin(0.5);
    let err = spec.run_tuner(&m, None).unwrap_err();
    assert!(matches!(err, TuneError::Convergence(_)), "{:?}", err);
    assert!(!z.is_set());
    assert!(!m.is_set());
}

#[test]
fn expectations_need_tuned_values() {
    let (spec, _, m) = motzkin(10.0);
    assert!(matches!(spec.expectations(&m, None), Err(TuneError::Eval(_))));
}
