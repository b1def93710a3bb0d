//! Numeric semantics shared by the fast path and the general evaluator.
//!
//! Every function here works on native `f64` / `i64` operands; callers coerce
//! booleans to `0`/`1` and integers to floats before calling the float
//! functions. Domain violations and overflow come back as [`RowError`]s so
//! that both execution paths classify failures identically.

use std::cmp::Ordering;
use std::f64::consts::PI;

use vela_api::RowError;

pub type MathResult<T> = Result<T, RowError>;

const DOMAIN: &str = "math domain error";
const RANGE: &str = "math range error";

fn domain() -> RowError {
    RowError::domain(DOMAIN)
}

fn range() -> RowError {
    RowError::overflow(RANGE)
}

/// Reject a finite input that overflowed to infinity.
fn check_range(input: f64, out: f64) -> MathResult<f64> {
    if out.is_infinite() && input.is_finite() {
        Err(range())
    } else {
        Ok(out)
    }
}

/// Numeric operand after bool → int coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

pub fn bool_to_int(b: bool) -> i64 {
    b as i64
}

// ---------------------------------------------------------------------------
// Logarithms and exponentials
// ---------------------------------------------------------------------------

/// Zero maps to `-inf`; negatives are a domain failure.
fn log_with(x: f64, f: fn(f64) -> f64) -> MathResult<f64> {
    if x.is_nan() {
        Ok(x)
    } else if x == 0.0 {
        Ok(f64::NEG_INFINITY)
    } else if x < 0.0 {
        Err(domain())
    } else {
        Ok(f(x))
    }
}

pub fn log(x: f64) -> MathResult<f64> {
    log_with(x, f64::ln)
}

pub fn log2(x: f64) -> MathResult<f64> {
    log_with(x, f64::log2)
}

pub fn log10(x: f64) -> MathResult<f64> {
    log_with(x, f64::log10)
}

/// `log(x, base)`.
pub fn log_base(x: f64, base: f64) -> MathResult<f64> {
    if base <= 0.0 {
        return Err(domain());
    }
    let num = log(x)?;
    let den = log(base)?;
    if den == 0.0 {
        return Err(RowError::zero_division("float division by zero"));
    }
    Ok(num / den)
}

pub fn log1p(x: f64) -> MathResult<f64> {
    if x.is_nan() {
        Ok(x)
    } else if x == -1.0 {
        Ok(f64::NEG_INFINITY)
    } else if x < -1.0 {
        Err(domain())
    } else {
        Ok(x.ln_1p())
    }
}

pub fn exp(x: f64) -> MathResult<f64> {
    check_range(x, x.exp())
}

pub fn expm1(x: f64) -> MathResult<f64> {
    check_range(x, x.exp_m1())
}

pub fn sqrt(x: f64) -> MathResult<f64> {
    if x < 0.0 { Err(domain()) } else { Ok(x.sqrt()) }
}

/// `math.pow`: always float.
pub fn pow(x: f64, y: f64) -> MathResult<f64> {
    if x.is_finite() && y.is_finite() {
        if x == 0.0 && y < 0.0 {
            return Err(domain());
        }
        if x < 0.0 && y.fract() != 0.0 {
            return Err(domain());
        }
    }
    let out = x.powf(y);
    if out.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(range());
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Trigonometry
// ---------------------------------------------------------------------------

fn periodic(x: f64, f: fn(f64) -> f64) -> MathResult<f64> {
    if x.is_infinite() { Err(domain()) } else { Ok(f(x)) }
}

pub fn sin(x: f64) -> MathResult<f64> {
    periodic(x, f64::sin)
}

pub fn cos(x: f64) -> MathResult<f64> {
    periodic(x, f64::cos)
}

pub fn tan(x: f64) -> MathResult<f64> {
    periodic(x, f64::tan)
}

pub fn asin(x: f64) -> MathResult<f64> {
    if x.abs() > 1.0 { Err(domain()) } else { Ok(x.asin()) }
}

pub fn acos(x: f64) -> MathResult<f64> {
    if x.abs() > 1.0 { Err(domain()) } else { Ok(x.acos()) }
}

pub fn atan(x: f64) -> MathResult<f64> {
    Ok(x.atan())
}

pub fn atan2(y: f64, x: f64) -> MathResult<f64> {
    Ok(y.atan2(x))
}

pub fn sinh(x: f64) -> MathResult<f64> {
    check_range(x, x.sinh())
}

pub fn cosh(x: f64) -> MathResult<f64> {
    check_range(x, x.cosh())
}

pub fn tanh(x: f64) -> MathResult<f64> {
    Ok(x.tanh())
}

pub fn asinh(x: f64) -> MathResult<f64> {
    Ok(x.asinh())
}

pub fn acosh(x: f64) -> MathResult<f64> {
    if x < 1.0 { Err(domain()) } else { Ok(x.acosh()) }
}

pub fn atanh(x: f64) -> MathResult<f64> {
    if x.abs() >= 1.0 { Err(domain()) } else { Ok(x.atanh()) }
}

pub fn radians(x: f64) -> MathResult<f64> {
    Ok(x * (PI / 180.0))
}

pub fn degrees(x: f64) -> MathResult<f64> {
    Ok(x * (180.0 / PI))
}

// ---------------------------------------------------------------------------
// Misc float helpers
// ---------------------------------------------------------------------------

pub fn fabs(x: f64) -> MathResult<f64> {
    Ok(x.abs())
}

pub fn hypot(x: f64, y: f64) -> MathResult<f64> {
    let out = x.hypot(y);
    if out.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(range());
    }
    Ok(out)
}

pub fn copysign(x: f64, y: f64) -> MathResult<f64> {
    Ok(x.copysign(y))
}

pub fn fmod(x: f64, y: f64) -> MathResult<f64> {
    if y == 0.0 || x.is_infinite() {
        if x.is_nan() || y.is_nan() {
            return Ok(f64::NAN);
        }
        return Err(domain());
    }
    Ok(x % y)
}

/// Float → integer with the range checks of `floor`, `ceil`, `trunc`, `int()`.
pub fn float_to_int(x: f64) -> MathResult<i64> {
    if x.is_nan() {
        return Err(RowError::conversion("cannot convert float NaN to integer"));
    }
    if x.is_infinite() {
        return Err(RowError::overflow("cannot convert float infinity to integer"));
    }
    // 2^63 is exactly representable; anything at or beyond it does not fit.
    if x >= 9_223_372_036_854_775_808.0 || x < -9_223_372_036_854_775_808.0 {
        return Err(RowError::overflow("integer out of range"));
    }
    Ok(x as i64)
}

pub fn floor(x: f64) -> MathResult<i64> {
    float_to_int(x.floor())
}

pub fn ceil(x: f64) -> MathResult<i64> {
    float_to_int(x.ceil())
}

pub fn trunc(x: f64) -> MathResult<i64> {
    float_to_int(x.trunc())
}

/// `round(x)`: ties to even, integer result.
pub fn round(x: f64) -> MathResult<i64> {
    float_to_int(x.round_ties_even())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn int_overflow() -> RowError {
    RowError::overflow("integer overflow")
}

pub fn int_add(a: i64, b: i64) -> MathResult<i64> {
    a.checked_add(b).ok_or_else(int_overflow)
}

pub fn int_sub(a: i64, b: i64) -> MathResult<i64> {
    a.checked_sub(b).ok_or_else(int_overflow)
}

pub fn int_mul(a: i64, b: i64) -> MathResult<i64> {
    a.checked_mul(b).ok_or_else(int_overflow)
}

pub fn int_neg(a: i64) -> MathResult<i64> {
    a.checked_neg().ok_or_else(int_overflow)
}

pub fn int_abs(a: i64) -> MathResult<i64> {
    a.checked_abs().ok_or_else(int_overflow)
}

fn int_zero_division() -> RowError {
    RowError::zero_division("integer division or modulo by zero")
}

/// Floor division: rounds toward negative infinity.
pub fn int_floor_div(a: i64, b: i64) -> MathResult<i64> {
    if b == 0 {
        return Err(int_zero_division());
    }
    let q = a.checked_div(b).ok_or_else(int_overflow)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Modulo with the sign of the divisor.
pub fn int_mod(a: i64, b: i64) -> MathResult<i64> {
    if b == 0 {
        return Err(int_zero_division());
    }
    if b == -1 {
        return Ok(0);
    }
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

/// True division of integers. Always float.
pub fn int_true_div(a: i64, b: i64) -> MathResult<f64> {
    if b == 0 {
        return Err(RowError::zero_division("division by zero"));
    }
    Ok(a as f64 / b as f64)
}

/// `a ** b` for integers with a non-negative exponent.
pub fn int_pow(a: i64, b: i64) -> MathResult<i64> {
    if b < 0 {
        return Err(RowError::domain("negative exponent for integer power"));
    }
    match a {
        0 => return Ok(if b == 0 { 1 } else { 0 }),
        1 => return Ok(1),
        -1 => return Ok(if b % 2 == 0 { 1 } else { -1 }),
        _ => {}
    }
    let exp = u32::try_from(b).map_err(|_| int_overflow())?;
    a.checked_pow(exp).ok_or_else(int_overflow)
}

/// `a ** b` for integers with a negative exponent, promoted to float.
pub fn int_pow_negative(a: i64, b: i64) -> MathResult<f64> {
    if a == 0 {
        return Err(RowError::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    float_pow(a as f64, b as f64)
}

pub fn float_div(a: f64, b: f64) -> MathResult<f64> {
    if b == 0.0 {
        return Err(RowError::zero_division("float division by zero"));
    }
    Ok(a / b)
}

/// Quotient and remainder with floor semantics for floats.
pub fn float_divmod(a: f64, b: f64) -> MathResult<(f64, f64)> {
    if b == 0.0 {
        return Err(RowError::zero_division("float divmod()"));
    }
    let mut m = a % b;
    let mut div = (a - m) / b;
    if m != 0.0 {
        if (b < 0.0) != (m < 0.0) {
            m += b;
            div -= 1.0;
        }
    } else {
        m = 0.0f64.copysign(b);
    }
    let floordiv = if div != 0.0 {
        let mut fd = div.floor();
        if div - fd > 0.5 {
            fd += 1.0;
        }
        fd
    } else {
        0.0f64.copysign(a / b)
    };
    Ok((floordiv, m))
}

pub fn float_floor_div(a: f64, b: f64) -> MathResult<f64> {
    float_divmod(a, b).map(|(q, _)| q)
}

pub fn float_mod(a: f64, b: f64) -> MathResult<f64> {
    float_divmod(a, b).map(|(_, r)| r)
}

/// The `**` operator on floats. Unlike [`pow`], zero to a negative power is a
/// zero-division failure.
pub fn float_pow(a: f64, b: f64) -> MathResult<f64> {
    if a == 0.0 && b < 0.0 && b.is_finite() {
        return Err(RowError::zero_division(
            "0.0 cannot be raised to a negative power",
        ));
    }
    pow(a, b)
}

/// Numeric ordering across int and float operands. `None` when a `nan` is involved.
pub fn compare(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (x, y) => x.to_f64().partial_cmp(&y.to_f64()),
    }
}

// ---------------------------------------------------------------------------
// Conversions from text
// ---------------------------------------------------------------------------

pub fn parse_int(s: &str) -> MathResult<i64> {
    s.trim().parse::<i64>().map_err(|_| {
        RowError::conversion(format!("invalid literal for int() with base 10: '{s}'"))
    })
}

pub fn parse_float(s: &str) -> MathResult<f64> {
    s.trim().parse::<f64>().map_err(|_| {
        RowError::conversion(format!("could not convert string to float: '{s}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_api::ErrorKind;

    #[test]
    fn log_family_zero_and_negative() {
        assert_eq!(log(0.0), Ok(f64::NEG_INFINITY));
        assert_eq!(log2(0.0), Ok(f64::NEG_INFINITY));
        assert_eq!(log10(-0.0), Ok(f64::NEG_INFINITY));
        assert_eq!(log1p(-1.0), Ok(f64::NEG_INFINITY));
        assert_eq!(log(-1.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(log1p(-2.0).unwrap_err().kind, ErrorKind::Domain);
        assert!(log(f64::NAN).unwrap().is_nan());
        assert_eq!(log(f64::INFINITY), Ok(f64::INFINITY));
    }

    #[test]
    fn log_base_rejects_non_positive_base() {
        assert_eq!(log_base(8.0, 2.0), Ok(3.0));
        assert_eq!(log_base(8.0, 0.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(log_base(8.0, -2.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(log_base(8.0, 1.0).unwrap_err().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn pow_edges() {
        for x in [-3.0, 1.0, 2.0, -1.0, 0.0] {
            assert_eq!(pow(x, 0.0), Ok(1.0));
        }
        assert_eq!(pow(-1.0, 2.0), Ok(1.0));
        assert_eq!(pow(2.0, -1.0), Ok(0.5));
        assert_eq!(pow(-8.0, 1.0 / 3.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(pow(0.0, -1.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(pow(10.0, 400.0).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(pow(f64::INFINITY, 2.0), Ok(f64::INFINITY));
    }

    #[test]
    fn trig_domains() {
        assert_eq!(asin(1.5).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(acos(-1.5).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(acosh(0.5).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(atanh(1.0).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(sin(f64::INFINITY).unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(tanh(f64::INFINITY), Ok(1.0));
        assert_eq!(atan(f64::NEG_INFINITY), Ok(-std::f64::consts::FRAC_PI_2));
    }

    #[test]
    fn exp_overflow_only_for_finite_input() {
        assert_eq!(exp(1000.0).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(exp(f64::INFINITY), Ok(f64::INFINITY));
        assert_eq!(exp(f64::NEG_INFINITY), Ok(0.0));
    }

    #[test]
    fn integer_division_floors() {
        assert_eq!(int_floor_div(7, 2), Ok(3));
        assert_eq!(int_floor_div(-7, 2), Ok(-4));
        assert_eq!(int_floor_div(7, -2), Ok(-4));
        assert_eq!(int_mod(-7, 2), Ok(1));
        assert_eq!(int_mod(7, -2), Ok(-1));
        assert_eq!(int_mod(i64::MIN, -1), Ok(0));
        assert_eq!(int_floor_div(i64::MIN, -1).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(int_floor_div(1, 0).unwrap_err().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn float_division_floors() {
        assert_eq!(float_floor_div(7.5, 2.0), Ok(3.0));
        assert_eq!(float_floor_div(-7.5, 2.0), Ok(-4.0));
        assert_eq!(float_mod(-7.5, 2.0), Ok(0.5));
        assert_eq!(float_mod(7.5, -2.0), Ok(-0.5));
        assert_eq!(float_div(1.0, 0.0).unwrap_err().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn integer_powers() {
        assert_eq!(int_pow(2, 10), Ok(1024));
        assert_eq!(int_pow(0, 0), Ok(1));
        assert_eq!(int_pow(-1, 1_000_000_001), Ok(-1));
        assert_eq!(int_pow(2, 64).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(int_pow_negative(2, -1), Ok(0.5));
        assert_eq!(int_pow_negative(0, -1).unwrap_err().kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn conversions() {
        assert_eq!(float_to_int(-2.9), Ok(-2));
        assert_eq!(floor(-2.5), Ok(-3));
        assert_eq!(ceil(-2.5), Ok(-2));
        assert_eq!(round(2.5), Ok(2));
        assert_eq!(round(3.5), Ok(4));
        assert_eq!(float_to_int(f64::NAN).unwrap_err().kind, ErrorKind::Conversion);
        assert_eq!(float_to_int(1e19).unwrap_err().kind, ErrorKind::Overflow);
        assert_eq!(parse_int(" 42 "), Ok(42));
        assert_eq!(parse_int("4.2").unwrap_err().kind, ErrorKind::Conversion);
        assert!(parse_float("nan").unwrap().is_nan());
        assert_eq!(parse_float("-inf"), Ok(f64::NEG_INFINITY));
    }

    #[test]
    fn mixed_comparison() {
        assert_eq!(compare(Num::Int(1), Num::Float(1.0)), Some(Ordering::Equal));
        assert_eq!(compare(Num::Int(2), Num::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(compare(Num::Float(f64::NAN), Num::Int(0)), None);
    }
}
