//! General evaluator: interprets UDF IR over tagged [`Value`]s.
//!
//! Handles every type combination the fast path may decline or fail on. A
//! data-dependent failure comes back as a non-fatal [`RowError`]; unsupported
//! operand types and wrong arity are fatal.

use std::borrow::Cow;
use std::cmp::Ordering;

use vela_api::{RowError, Value};

use crate::math::{self, Num};
use crate::udf::{BinaryOp, Builtin, CmpOp, Expr, Udf, UnaryOp};

/// Evaluate `udf` against one row.
pub fn evaluate(udf: &Udf, row: &[Value]) -> Result<Value, RowError> {
    let args = bind_args(udf.arity(), row)?;
    eval_expr(udf.body(), &args)
}

/// Map a row onto the parameters of a function of `arity`.
///
/// Equal width binds columns positionally; a single parameter over a wider
/// (or empty) row receives the whole row as a tuple.
pub fn bind_args(arity: usize, row: &[Value]) -> Result<Cow<'_, [Value]>, RowError> {
    if arity == row.len() {
        Ok(Cow::Borrowed(row))
    } else if arity == 1 {
        Ok(Cow::Owned(vec![Value::Tuple(row.to_vec())]))
    } else {
        Err(RowError::arity(format!(
            "function takes {arity} argument(s) but the row has {} column(s)",
            row.len()
        )))
    }
}

/// Type name used in error messages.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "str",
        Value::Tuple(_) => "tuple",
    }
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::Int(math::bool_to_int(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

pub fn eval_expr(expr: &Expr, args: &[Value]) -> Result<Value, RowError> {
    match expr {
        Expr::Const(v) => Ok(v.clone()),
        Expr::Param(i) => args
            .get(*i)
            .cloned()
            .ok_or_else(|| RowError::arity(format!("missing argument {i}"))),
        Expr::Unary(op, e) => unary_op(*op, eval_expr(e, args)?),
        Expr::Binary(op, a, b) => {
            let a = eval_expr(a, args)?;
            let b = eval_expr(b, args)?;
            binary_op(*op, &a, &b)
        }
        Expr::Compare(first, links) => {
            let mut lhs = eval_expr(first, args)?;
            for (op, e) in links {
                let rhs = eval_expr(e, args)?;
                if !compare_values(*op, &lhs, &rhs)? {
                    return Ok(Value::Bool(false));
                }
                lhs = rhs;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(a, b) => {
            let lhs = eval_expr(a, args)?;
            if lhs.is_truthy() { eval_expr(b, args) } else { Ok(lhs) }
        }
        Expr::Or(a, b) => {
            let lhs = eval_expr(a, args)?;
            if lhs.is_truthy() { Ok(lhs) } else { eval_expr(b, args) }
        }
        Expr::IfElse {
            cond,
            then,
            otherwise,
        } => {
            if eval_expr(cond, args)?.is_truthy() {
                eval_expr(then, args)
            } else {
                eval_expr(otherwise, args)
            }
        }
        Expr::Call(f, call_args) => {
            let vals = call_args
                .iter()
                .map(|e| eval_expr(e, args))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(*f, &vals)
        }
        Expr::Tuple(items) => items
            .iter()
            .map(|e| eval_expr(e, args))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Tuple),
        Expr::Index(base, idx) => {
            let base = eval_expr(base, args)?;
            let idx = eval_expr(idx, args)?;
            index_value(&base, &idx)
        }
        Expr::Field(_, name) => Err(RowError::type_error(format!(
            "column '{name}' accessed by name on a row without bound column names"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

pub fn unary_op(op: UnaryOp, v: Value) -> Result<Value, RowError> {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-math::bool_to_int(b))),
        (UnaryOp::Neg, Value::Int(i)) => math::int_neg(i).map(Value::Int),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(math::bool_to_int(b))),
        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (op, v) => {
            let sym = if op == UnaryOp::Neg { "-" } else { "+" };
            Err(RowError::type_error(format!(
                "bad operand type for unary {sym}: '{}'",
                type_name(&v)
            )))
        }
    }
}

fn unsupported(op: BinaryOp, a: &Value, b: &Value) -> RowError {
    RowError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        type_name(a),
        type_name(b)
    ))
}

pub fn numeric_binary(op: BinaryOp, a: Num, b: Num) -> Result<Value, RowError> {
    use BinaryOp::*;
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            Add => math::int_add(x, y).map(Value::Int),
            Sub => math::int_sub(x, y).map(Value::Int),
            Mul => math::int_mul(x, y).map(Value::Int),
            Div => math::int_true_div(x, y).map(Value::Float),
            FloorDiv => math::int_floor_div(x, y).map(Value::Int),
            Mod => math::int_mod(x, y).map(Value::Int),
            Pow if y >= 0 => math::int_pow(x, y).map(Value::Int),
            Pow => math::int_pow_negative(x, y).map(Value::Float),
        },
        (a, b) => float_binary(op, a.to_f64(), b.to_f64()).map(Value::Float),
    }
}

pub fn float_binary(op: BinaryOp, x: f64, y: f64) -> Result<f64, RowError> {
    use BinaryOp::*;
    match op {
        Add => Ok(x + y),
        Sub => Ok(x - y),
        Mul => Ok(x * y),
        Div => math::float_div(x, y),
        FloorDiv => math::float_floor_div(x, y),
        Mod => math::float_mod(x, y),
        Pow => math::float_pow(x, y),
    }
}

/// Longest string (in bytes) or tuple `seq * n` may build.
pub const MAX_REPEAT_LEN: usize = 1 << 26;

fn repeat_count(v: &Value) -> Option<i64> {
    match num(v)? {
        Num::Int(n) => Some(n),
        Num::Float(_) => None,
    }
}

/// Length of `len` items repeated `count` times. Negative counts give an empty result.
pub(crate) fn repeat_len(len: usize, count: i64) -> Result<usize, RowError> {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    len.checked_mul(count)
        .filter(|&total| total <= MAX_REPEAT_LEN)
        .ok_or_else(|| RowError::overflow("repeated sequence is too long"))
}

pub(crate) fn repeat_str(s: &str, count: i64) -> Result<String, RowError> {
    let total = repeat_len(s.len(), count)?;
    if total == 0 {
        return Ok(String::new());
    }
    Ok(s.repeat(total / s.len()))
}

pub(crate) fn repeat_items<T: Clone>(items: &[T], count: i64) -> Result<Vec<T>, RowError> {
    let total = repeat_len(items.len(), count)?;
    Ok(items.iter().cycle().take(total).cloned().collect())
}

pub fn binary_op(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, RowError> {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return numeric_binary(op, x, y);
    }
    match (op, a, b) {
        (BinaryOp::Add, Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
        (BinaryOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            Ok(Value::Tuple(x.iter().chain(y).cloned().collect()))
        }
        (BinaryOp::Mul, Value::Str(s), n) | (BinaryOp::Mul, n, Value::Str(s)) => {
            let count = repeat_count(n).ok_or_else(|| unsupported(op, a, b))?;
            Ok(Value::Str(repeat_str(s, count)?))
        }
        (BinaryOp::Mul, Value::Tuple(items), n) | (BinaryOp::Mul, n, Value::Tuple(items)) => {
            let count = repeat_count(n).ok_or_else(|| unsupported(op, a, b))?;
            Ok(Value::Tuple(repeat_items(items, count)?))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

/// `==` across any two values. Numbers compare numerically, mismatched kinds are unequal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return math::compare(x, y) == Some(Ordering::Equal);
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        _ => false,
    }
}

pub fn compare_values(op: CmpOp, a: &Value, b: &Value) -> Result<bool, RowError> {
    if let (Some(x), Some(y)) = (num(a), num(b)) {
        return Ok(match math::compare(x, y) {
            Some(ord) => op.test(ord),
            None => op == CmpOp::Ne,
        });
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(op.test(x.cmp(y))),
        (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y) {
                if !values_equal(p, q) {
                    return match op {
                        CmpOp::Eq => Ok(false),
                        CmpOp::Ne => Ok(true),
                        _ => compare_values(op, p, q),
                    };
                }
            }
            Ok(op.test(x.len().cmp(&y.len())))
        }
        _ if op == CmpOp::Eq => Ok(false),
        _ if op == CmpOp::Ne => Ok(true),
        _ => Err(RowError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            type_name(a),
            type_name(b)
        ))),
    }
}

/// Sequence index where negative offsets count from the end.
pub fn resolve_index(len: usize, i: i64) -> Option<usize> {
    let i = if i < 0 { i + len as i64 } else { i };
    (0..len as i64).contains(&i).then_some(i as usize)
}

pub fn index_value(base: &Value, idx: &Value) -> Result<Value, RowError> {
    let i = match idx {
        Value::Int(i) => *i,
        Value::Bool(b) => math::bool_to_int(*b),
        other => {
            return Err(RowError::type_error(format!(
                "indices must be integers, not {}",
                type_name(other)
            )));
        }
    };
    match base {
        Value::Tuple(items) => resolve_index(items.len(), i)
            .map(|p| items[p].clone())
            .ok_or_else(|| RowError::index("tuple index out of range")),
        Value::Str(s) => {
            let len = s.chars().count();
            resolve_index(len, i)
                .and_then(|p| s.chars().nth(p))
                .map(|c| Value::Str(c.to_string()))
                .ok_or_else(|| RowError::index("string index out of range"))
        }
        other => Err(RowError::type_error(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn real(f: Builtin, v: &Value) -> Result<f64, RowError> {
    num(v).map(Num::to_f64).ok_or_else(|| {
        RowError::type_error(format!(
            "{}() must be a real number, not {}",
            f.name(),
            type_name(v)
        ))
    })
}

/// One-argument float function behind `f`.
pub fn float_fn1(f: Builtin) -> Option<fn(f64) -> Result<f64, RowError>> {
    use Builtin::*;
    Some(match f {
        Log => math::log,
        Log1p => math::log1p,
        Log2 => math::log2,
        Log10 => math::log10,
        Exp => math::exp,
        Expm1 => math::expm1,
        Sqrt => math::sqrt,
        Sin => math::sin,
        Cos => math::cos,
        Tan => math::tan,
        Asin => math::asin,
        Acos => math::acos,
        Atan => math::atan,
        Sinh => math::sinh,
        Cosh => math::cosh,
        Tanh => math::tanh,
        Asinh => math::asinh,
        Acosh => math::acosh,
        Atanh => math::atanh,
        Radians => math::radians,
        Degrees => math::degrees,
        Fabs => math::fabs,
        _ => return None,
    })
}

/// Two-argument float function behind `f`. `log` here is the two-argument form.
pub fn float_fn2(f: Builtin) -> Option<fn(f64, f64) -> Result<f64, RowError>> {
    use Builtin::*;
    Some(match f {
        Log => math::log_base,
        Pow => math::pow,
        Atan2 => math::atan2,
        Hypot => math::hypot,
        Copysign => math::copysign,
        Fmod => math::fmod,
        _ => return None,
    })
}

/// Float-to-integer rounding functions; integer arguments pass through unchanged.
pub fn integral_fn(f: Builtin) -> Option<fn(f64) -> Result<i64, RowError>> {
    use Builtin::*;
    Some(match f {
        Floor => math::floor,
        Ceil => math::ceil,
        Trunc => math::trunc,
        Round => math::round,
        _ => return None,
    })
}

pub fn predicate_fn(f: Builtin) -> Option<fn(f64) -> bool> {
    use Builtin::*;
    Some(match f {
        Isnan => f64::is_nan,
        Isinf => f64::is_infinite,
        Isfinite => f64::is_finite,
        _ => return None,
    })
}

/// Integral rounding: integers pass through, floats go through `op`.
fn to_integral(
    f: Builtin,
    v: &Value,
    op: fn(f64) -> Result<i64, RowError>,
) -> Result<Value, RowError> {
    match num(v) {
        Some(Num::Int(i)) => Ok(Value::Int(i)),
        Some(Num::Float(x)) => op(x).map(Value::Int),
        None => Err(RowError::type_error(format!(
            "{}() must be a real number, not {}",
            f.name(),
            type_name(v)
        ))),
    }
}

fn extremum(f: Builtin, args: &[Value]) -> Result<Value, RowError> {
    let items: &[Value] = match args {
        [Value::Tuple(items)] => items,
        [single] => {
            return Err(RowError::type_error(format!(
                "{}() argument must be a tuple or several values, not {}",
                f.name(),
                type_name(single)
            )));
        }
        many => many,
    };
    let Some((first, rest)) = items.split_first() else {
        return Err(RowError::domain(format!(
            "{}() arg is an empty sequence",
            f.name()
        )));
    };
    let op = if f == Builtin::Max { CmpOp::Gt } else { CmpOp::Lt };
    let mut best = first;
    for item in rest {
        if compare_values(op, item, best)? {
            best = item;
        }
    }
    Ok(best.clone())
}

pub fn call_builtin(f: Builtin, args: &[Value]) -> Result<Value, RowError> {
    if !f.accepts_args(args.len()) {
        return Err(RowError::arity(format!(
            "{}() does not take {} argument(s)",
            f.name(),
            args.len()
        )));
    }
    if let Some(op) = float_fn2(f).filter(|_| args.len() == 2) {
        return op(real(f, &args[0])?, real(f, &args[1])?).map(Value::Float);
    }
    if let Some(op) = float_fn1(f).filter(|_| args.len() == 1) {
        return op(real(f, &args[0])?).map(Value::Float);
    }
    if let Some(op) = integral_fn(f) {
        return to_integral(f, &args[0], op);
    }
    if let Some(pred) = predicate_fn(f) {
        return Ok(Value::Bool(pred(real(f, &args[0])?)));
    }

    use Builtin::*;
    match f {
        Abs => match num(&args[0]) {
            Some(Num::Int(i)) => math::int_abs(i).map(Value::Int),
            Some(Num::Float(x)) => Ok(Value::Float(x.abs())),
            None => Err(RowError::type_error(format!(
                "bad operand type for abs(): '{}'",
                type_name(&args[0])
            ))),
        },
        Min | Max => extremum(f, args),
        Int => match args.first() {
            None => Ok(Value::Int(0)),
            Some(Value::Str(s)) => math::parse_int(s).map(Value::Int),
            Some(v) => to_integral(f, v, math::float_to_int),
        },
        Float => match args.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Str(s)) => math::parse_float(s).map(Value::Float),
            Some(v) => real(f, v).map(Value::Float),
        },
        Bool => Ok(Value::Bool(args.first().is_some_and(Value::is_truthy))),
        Str => Ok(Value::Str(
            args.first().map(Value::to_string).unwrap_or_default(),
        )),
        Len => match &args[0] {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(RowError::type_error(format!(
                "object of type '{}' has no len()",
                type_name(other)
            ))),
        },
        other => Err(RowError::arity(format!(
            "{}() does not take {} argument(s)",
            other.name(),
            args.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_api::ErrorKind;

    fn run(src: &str, row: &[Value]) -> Result<Value, RowError> {
        evaluate(&Udf::parse(src).unwrap(), row)
    }

    #[test]
    fn booleans_are_integers() {
        assert_eq!(run("lambda x: math.log(x)", &[Value::Bool(true)]), Ok(Value::Float(0.0)));
        assert_eq!(
            run("lambda x: math.log(x)", &[Value::Bool(false)]),
            Ok(Value::Float(f64::NEG_INFINITY))
        );
        assert_eq!(
            run("lambda x, y: x + y", &[Value::Bool(true), Value::Bool(true)]),
            Ok(Value::Int(2))
        );
        assert_eq!(
            run("lambda x, y: math.pow(x, y)", &[Value::Bool(true), Value::Bool(false)]),
            Ok(Value::Float(1.0))
        );
    }

    #[test]
    fn domain_failures_are_reported() {
        let err = run("lambda x: math.log(x)", &[Value::Int(-1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Domain);
        let err = run("lambda x: 1 / x", &[Value::Int(0)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
    }

    #[test]
    fn type_errors_are_fatal() {
        let err = run("lambda x: x + 1", &[Value::from("a")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.is_fatal());
        let err = run("lambda x: x < 'a'", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn binding_rules() {
        let row = [Value::Int(3), Value::Int(4)];
        assert_eq!(run("lambda a, b: a * b", &row), Ok(Value::Int(12)));
        assert_eq!(run("lambda t: t[1] - t[0]", &row), Ok(Value::Int(1)));
        let err = run("lambda a, b, c: a", &row).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Arity);
    }

    #[test]
    fn integer_power_promotes_on_negative_exponent() {
        let row = [Value::Int(2), Value::Int(-1)];
        assert_eq!(run("lambda a, b: a ** b", &row), Ok(Value::Float(0.5)));
        let row = [Value::Int(2), Value::Int(10)];
        assert_eq!(run("lambda a, b: a ** b", &row), Ok(Value::Int(1024)));
    }

    #[test]
    fn sequences() {
        assert_eq!(run("lambda s: s * 2 + '!'", &[Value::from("ab")]), Ok(Value::from("abab!")));
        assert_eq!(run("lambda s: len(s)", &[Value::from("héllo")]), Ok(Value::Int(5)));
        assert_eq!(run("lambda s: s[-1]", &[Value::from("xyz")]), Ok(Value::from("z")));
        let err = run("lambda t: t[5]", &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
    }

    #[test]
    fn comparisons() {
        assert_eq!(run("lambda x: 0 < x < 10", &[Value::Float(5.0)]), Ok(Value::Bool(true)));
        assert_eq!(run("lambda x: x == x", &[Value::Float(f64::NAN)]), Ok(Value::Bool(false)));
        assert_eq!(run("lambda x: x != x", &[Value::Float(f64::NAN)]), Ok(Value::Bool(true)));
        assert_eq!(run("lambda x: x == 'a'", &[Value::Int(1)]), Ok(Value::Bool(false)));
        assert_eq!(
            run("lambda a, b: (a, 1) < (a, 2)", &[Value::Int(0), Value::Int(0)]),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn logic_returns_operands() {
        assert_eq!(run("lambda x: x or 7", &[Value::Int(0)]), Ok(Value::Int(7)));
        assert_eq!(run("lambda x: x and 7", &[Value::Int(0)]), Ok(Value::Int(0)));
        assert_eq!(run("lambda x: not x", &[Value::from("")]), Ok(Value::Bool(true)));
    }

    #[test]
    fn conversions_and_extrema() {
        assert_eq!(run("lambda s: int(s)", &[Value::from(" 12 ")]), Ok(Value::Int(12)));
        let err = run("lambda s: int(s)", &[Value::from("x")]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conversion);
        assert_eq!(run("lambda x: str(x)", &[Value::Float(1.0)]), Ok(Value::from("1.0")));
        assert_eq!(run("lambda x: round(x)", &[Value::Float(2.5)]), Ok(Value::Int(2)));
        assert_eq!(
            run("lambda a, b: max(a, b)", &[Value::Int(1), Value::Float(2.5)]),
            Ok(Value::Float(2.5))
        );
        assert_eq!(
            run("lambda t: min(t)", &[Value::Int(3), Value::Int(-1), Value::Int(2)]),
            Ok(Value::Int(-1))
        );
        assert_eq!(run("lambda x: math.floor(x)", &[Value::Float(-0.5)]), Ok(Value::Int(-1)));
    }

    #[test]
    fn sequence_repetition_is_bounded() {
        assert_eq!(run("lambda s: s * 3", &[Value::from("ab")]), Ok(Value::from("ababab")));
        assert_eq!(run("lambda s: -1 * s", &[Value::from("ab")]), Ok(Value::from("")));
        assert_eq!(
            run("lambda a, b: (a, b) * 2", &[Value::Int(1), Value::Int(2)]),
            Ok(Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(2)]))
        );
        let huge = Value::Int(1 << 62);
        assert_eq!(
            run("lambda s, n: s * n", &[Value::from(""), huge.clone()]),
            Ok(Value::from(""))
        );
        let err = run("lambda s, n: s * n", &[Value::from("ab"), huge.clone()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
        let err = run("lambda a, n: (a, a) * n", &[Value::Int(1), huge]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }
}
