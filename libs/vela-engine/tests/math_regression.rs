use std::f64::consts::{E, FRAC_PI_2, FRAC_PI_4, PI};

use vela_api::{ErrorKind, Value};
use vela_engine::{Context, EngineConfig};

fn ctx() -> Context {
    let mut config = EngineConfig::default();
    config.executor.workers = 2;
    Context::new(config).unwrap()
}

fn run<V: Into<Value>>(rows: impl IntoIterator<Item = V>, udf: &str) -> Vec<Value> {
    ctx().parallelize(rows).map(udf).unwrap().collect().unwrap()
}

#[track_caller]
fn assert_close(actual: &Value, expected: f64) {
    let Value::Float(x) = actual else {
        panic!("expected a float, got {actual:?}");
    };
    if expected.is_infinite() || expected.is_nan() {
        assert!(
            x.to_bits() == expected.to_bits() || (x.is_nan() && expected.is_nan()),
            "{x} != {expected}"
        );
    } else {
        assert!((x - expected).abs() <= 1e-7, "{x} != {expected}");
    }
}

#[track_caller]
fn assert_all_close(actual: &[Value], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "wrong length");
    for (a, e) in actual.iter().zip(expected) {
        assert_close(a, *e);
    }
}

fn floats(values: &[f64]) -> Vec<Value> {
    values.iter().map(|&x| Value::Float(x)).collect()
}

#[test]
fn constants_format_like_str() {
    let out = ctx()
        .parallelize([0])
        .map("lambda x: (pi, math.e, math.tau, math.inf, math.nan, -math.inf)")
        .unwrap()
        .map("lambda a, b, c, d, e, f: (str(a), str(b), str(c), str(d), str(e), str(f))")
        .unwrap()
        .collect()
        .unwrap();
    assert_eq!(
        out,
        vec![Value::Tuple(
            ["3.14159", "2.71828", "6.28319", "inf", "nan", "-inf"]
                .into_iter()
                .map(Value::from)
                .collect()
        )]
    );
}

#[test]
fn log() {
    let out = run([E, 1.0, E * E, 1.0 / E], "lambda x: math.log(x)");
    assert_all_close(&out, &[1.0, 0.0, 2.0, -1.0]);

    let out = run([3, 1, 2, 6], "lambda x: math.log(x)");
    assert_all_close(&out, &[3f64.ln(), 0.0, 2f64.ln(), 6f64.ln()]);

    let out = run([true, false], "lambda x: math.log(x)");
    assert_all_close(&out, &[0.0, f64::NEG_INFINITY]);
}

#[test]
fn log_with_base() {
    let out = run([8.0, 1.0], "lambda x: math.log(x, 2)");
    assert_all_close(&out, &[3.0, 0.0]);

    for base in ["0", "0.0", "-2"] {
        let err = ctx()
            .parallelize([8.0, 1.0])
            .map(format!("lambda x: math.log(x, {base})"))
            .unwrap()
            .collect()
            .unwrap_err();
        assert_eq!(err.row_error().map(|e| e.kind), Some(ErrorKind::Domain), "base {base}");
    }
}

#[test]
fn exp() {
    let out = run([1.0, 0.0, 2.0, -1.0], "lambda x: math.exp(x)");
    assert_all_close(&out, &[E, 1.0, 2f64.exp(), (-1f64).exp()]);

    let out = run([0, 1, -1, 4, -4], "lambda x: math.exp(x)");
    assert_all_close(&out, &[1.0, E, (-1f64).exp(), 4f64.exp(), (-4f64).exp()]);

    let out = run([true, false], "lambda x: math.exp(x)");
    assert_eq!(out, floats(&[1f64.exp(), 1.0]));
}

#[test]
fn sin_family() {
    let out = run([0.0, FRAC_PI_2, -FRAC_PI_2], "lambda x: math.sin(x)");
    assert_eq!(out, floats(&[0.0, 1.0, -1.0]));

    assert_eq!(run([0.0], "lambda x: math.sinh(x)"), floats(&[0.0]));

    let out = run([-1.0, 0.0, 1.0], "lambda x: math.asin(x)");
    assert_eq!(out, floats(&[-FRAC_PI_2, 0.0, FRAC_PI_2]));

    let out = run([0.0, 1.0, -1.0], "lambda x: math.asinh(x)");
    assert_all_close(&out, &[0.0, 0.881_373_587_019_543, -0.881_373_587_019_543]);
}

#[test]
fn cos_family() {
    let out = run([-FRAC_PI_2, 0.0, FRAC_PI_2, PI], "lambda x: math.cos(x)");
    assert_all_close(&out, &[0.0, 1.0, 0.0, -1.0]);

    assert_eq!(run([0.0], "lambda x: math.cosh(x)"), floats(&[1.0]));

    let out = run([-1.0, 0.0, 1.0], "lambda x: math.acos(x)");
    assert_all_close(&out, &[PI, FRAC_PI_2, 0.0]);

    let out = run([1.0, 2.0], "lambda x: math.acosh(x)");
    assert_all_close(&out, &[0.0, 1.316_957_896_924_816_6]);
}

#[test]
fn tan_family() {
    let out = run(
        [0.0, f64::INFINITY, f64::NEG_INFINITY],
        "lambda x: math.tanh(x)",
    );
    assert_eq!(out, floats(&[0.0, 1.0, -1.0]));

    let out = run(
        [-1.0, 0.0, 1.0, f64::INFINITY, f64::NEG_INFINITY],
        "lambda x: math.atan(x)",
    );
    assert_all_close(&out, &[-FRAC_PI_4, 0.0, FRAC_PI_4, FRAC_PI_2, -FRAC_PI_2]);

    let out = run([0.0, 0.5, -0.5], "lambda x: math.atanh(x)");
    assert_all_close(&out, &[0.0, 0.549_306_144_334_054_9, -0.549_306_144_334_054_9]);
}

#[test]
fn atan2_keeps_order() {
    let out = run(
        [(-1, 0), (-1, 1), (0, 1), (1, 1), (1, 0)],
        "lambda x, y: math.atan2(x, y)",
    );
    assert_all_close(&out, &[-FRAC_PI_2, -FRAC_PI_4, 0.0, FRAC_PI_4, FRAC_PI_2]);
}

#[test]
fn angle_conversion() {
    let out = run([180.0, 90.0, -45.0, 0.0], "lambda x: math.radians(x)");
    assert_all_close(&out, &[PI, FRAC_PI_2, -FRAC_PI_4, 0.0]);

    let out = run([PI, FRAC_PI_2, -FRAC_PI_4, 0.0], "lambda x: math.degrees(x)");
    assert_all_close(&out, &[180.0, 90.0, -45.0, 0.0]);
}

#[test]
fn sqrt() {
    assert_eq!(
        run([0.0, 1.0, 4.0], "lambda x: math.sqrt(x)"),
        floats(&[0.0, 1.0, 2.0])
    );
}

#[test]
fn log1p() {
    let out = run([E - 1.0, E * E - 1.0, 1.0 / E - 1.0], "lambda x: math.log1p(x)");
    assert_all_close(&out, &[1.0, 2.0, -1.0]);

    let out = run([0, 1, 4], "lambda x: math.log1p(x)");
    assert_all_close(&out, &[0.0, 1f64.ln_1p(), 4f64.ln_1p()]);

    let out = run([true, false], "lambda x: math.log1p(x)");
    assert_eq!(out, floats(&[1f64.ln_1p(), 0.0]));
}

#[test]
fn log2_and_log10() {
    let out = run([2.0, 1.0, 4.0, 0.25], "lambda x: math.log2(x)");
    assert_all_close(&out, &[1.0, 0.0, 2.0, -2.0]);
    let out = run([2, 1, 4, 8], "lambda x: math.log2(x)");
    assert_all_close(&out, &[1.0, 0.0, 2.0, 3.0]);
    let out = run([true, false], "lambda x: math.log2(x)");
    assert_all_close(&out, &[0.0, f64::NEG_INFINITY]);

    let out = run([10.0, 1.0, 1000.0, 0.1], "lambda x: math.log10(x)");
    assert_all_close(&out, &[1.0, 0.0, 3.0, -1.0]);
    let out = run([10, 1, 100, 1000], "lambda x: math.log10(x)");
    assert_all_close(&out, &[1.0, 0.0, 2.0, 3.0]);
    let out = run([true, false], "lambda x: math.log10(x)");
    assert_all_close(&out, &[0.0, f64::NEG_INFINITY]);
}

#[test]
fn expm1() {
    let out = run([-1.0, 1.0, 2.0, 0.0], "lambda x: math.expm1(x)");
    assert_all_close(&out, &[(-1f64).exp_m1(), 1f64.exp_m1(), 2f64.exp_m1(), 0.0]);

    let out = run([1, -1, 0, 2], "lambda x: math.expm1(x)");
    assert_all_close(&out, &[1f64.exp_m1(), (-1f64).exp_m1(), 0.0, 2f64.exp_m1()]);

    let out = run([true, false], "lambda x: math.expm1(x)");
    assert_eq!(out, floats(&[1f64.exp_m1(), 0.0]));
}

#[test]
fn pow() {
    let out = run([-1.0, 1.0, 2.0, 0.0], "lambda x: math.pow(-3.0, x)");
    assert_all_close(&out, &[-1.0 / 3.0, -3.0, 9.0, 1.0]);

    let out = run([-1.0, 1.0, 2.0, 0.0], "lambda x: math.pow(x, 2.0)");
    assert_all_close(&out, &[1.0, 1.0, 4.0, 0.0]);

    let out = run(
        [(-1.0, 4.0), (1.0, -2.0), (2.0, 0.0), (-3.0, 0.0)],
        "lambda x, y: math.pow(x, y)",
    );
    assert_all_close(&out, &[1.0, 1.0, 1.0, 1.0]);

    let out = run([1, -1, 0, 2], "lambda x: math.pow(2, x)");
    assert_all_close(&out, &[2.0, 0.5, 1.0, 4.0]);

    let out = run([1, -1, -2, 2], "lambda x: math.pow(x, 0)");
    assert_eq!(out, floats(&[1.0; 4]));

    let out = run(
        [(1, -2), (-1, 2), (0, 1), (2, -2)],
        "lambda x, y: math.pow(x, y)",
    );
    assert_all_close(&out, &[1.0, 1.0, 0.0, 0.25]);

    let out = run(
        [(true, false), (true, true), (false, true), (false, false)],
        "lambda x, y: math.pow(x, y)",
    );
    assert_eq!(out, floats(&[1.0, 1.0, 0.0, 1.0]));
}

#[test]
fn pow_edge_cases() {
    assert_eq!(run([(0, 0)], "lambda x, y: math.pow(x, y)"), floats(&[1.0]));
    assert_eq!(run([(-1.0, 2.0)], "lambda x, y: math.pow(x, y)"), floats(&[1.0]));
    assert_eq!(run([(2, -1)], "lambda x, y: math.pow(x, y)"), floats(&[0.5]));
    assert_eq!(
        run([-3.0, 1.0, 2.0], "lambda x: math.pow(x, 0)"),
        floats(&[1.0; 3])
    );
}
