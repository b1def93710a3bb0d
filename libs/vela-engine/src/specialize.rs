//! Fast-path specializer.
//!
//! Lowers a UDF under a concrete [`Schema`] into a tree of typed closures that
//! operate on native `bool`/`i64`/`f64`/`String` values. Lowering declines
//! ([`Unspecializable`]) whenever the result type of an expression would depend
//! on run-time values; the caller then routes rows to the general evaluator.
//!
//! A compiled function never reports a success the general evaluator would not
//! produce. Every other outcome is a [`FastPathFailure`], which the executor
//! answers by re-running the row on the general path.

use std::fmt;
use std::sync::Arc;

use vela_api::{ErrorKind, RowError, Schema, Type, Value};

use crate::eval::{self, resolve_index};
use crate::math::{self, Num};
use crate::udf::{BinaryOp, Builtin, CmpOp, Expr, Udf, UdfId, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Domain,
    ZeroDivision,
    Overflow,
    Index,
    Conversion,
    /// The row does not match the schema the function was compiled for.
    Nonconforming,
}

/// Row-local, recoverable; never surfaced to the caller of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPathFailure {
    pub reason: FailureReason,
}

impl FastPathFailure {
    pub fn nonconforming() -> Self {
        Self {
            reason: FailureReason::Nonconforming,
        }
    }
}

impl From<RowError> for FastPathFailure {
    fn from(e: RowError) -> Self {
        let reason = match e.kind {
            ErrorKind::Domain => FailureReason::Domain,
            ErrorKind::ZeroDivision => FailureReason::ZeroDivision,
            ErrorKind::Overflow => FailureReason::Overflow,
            ErrorKind::Index => FailureReason::Index,
            ErrorKind::Conversion => FailureReason::Conversion,
            ErrorKind::Type | ErrorKind::Arity => FailureReason::Nonconforming,
        };
        Self { reason }
    }
}

/// Lowering declined: the UDF has no fast path under this schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not specializable: {0}")]
pub struct Unspecializable(pub String);

fn decline<T>(why: impl Into<String>) -> Result<T, Unspecializable> {
    Err(Unspecializable(why.into()))
}

type Thunk<T> = Arc<dyn Fn(&[Value]) -> Result<T, FastPathFailure> + Send + Sync>;

/// A UDF specialized for one row schema.
pub struct CompiledUdf {
    udf: UdfId,
    schema: Schema,
    output: Type,
    run: Thunk<Value>,
}

impl CompiledUdf {
    pub fn udf(&self) -> UdfId {
        self.udf
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Statically known result type.
    pub fn output(&self) -> &Type {
        &self.output
    }

    pub fn call(&self, row: &[Value]) -> Result<Value, FastPathFailure> {
        if !self.schema.conforms(row) {
            return Err(FastPathFailure::nonconforming());
        }
        (self.run)(row)
    }
}

impl fmt::Debug for CompiledUdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUdf")
            .field("udf", &self.udf)
            .field("schema", &self.schema)
            .field("output", &self.output)
            .finish()
    }
}

/// Build the fast path of `udf` for rows of `schema`.
pub fn specialize(udf: &Udf, schema: &Schema) -> Result<CompiledUdf, Unspecializable> {
    let Some(columns) = schema.columns().filter(|_| schema.is_specialized()) else {
        return decline(format!("schema {schema} has unknown positions"));
    };

    let accessors = columns
        .iter()
        .enumerate()
        .map(|(i, ty)| accessor(vec![i], ty))
        .collect::<Result<Vec<_>, _>>()?;
    let params = if udf.arity() == columns.len() {
        accessors
    } else if udf.arity() == 1 {
        vec![Lowered::pure(Shape::Tuple(accessors))]
    } else {
        return decline(format!(
            "arity {} does not fit rows of width {}",
            udf.arity(),
            columns.len()
        ));
    };

    let body = Lowerer { params }.lower(udf.body())?;
    let output = body.ty();
    Ok(CompiledUdf {
        udf: udf.id(),
        schema: schema.clone(),
        output,
        run: into_value(body),
    })
}

// ---------------------------------------------------------------------------
// Lowered form
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Shape {
    Bool(Thunk<bool>),
    Int(Thunk<i64>),
    Float(Thunk<f64>),
    Str(Thunk<String>),
    Tuple(Vec<Lowered>),
}

#[derive(Clone)]
struct Lowered {
    shape: Shape,
    /// Cannot fail on a conforming row (column reads, constants).
    pure: bool,
    constant: Option<Value>,
}

impl Lowered {
    fn pure(shape: Shape) -> Self {
        Self {
            shape,
            pure: true,
            constant: None,
        }
    }

    fn computed(shape: Shape) -> Self {
        Self {
            shape,
            pure: false,
            constant: None,
        }
    }

    fn ty(&self) -> Type {
        match &self.shape {
            Shape::Bool(_) => Type::Bool,
            Shape::Int(_) => Type::Int,
            Shape::Float(_) => Type::Float,
            Shape::Str(_) => Type::Str,
            Shape::Tuple(items) => Type::Tuple(items.iter().map(Lowered::ty).collect()),
        }
    }

    fn const_int(&self) -> Option<i64> {
        match self.constant {
            Some(Value::Int(i)) => Some(i),
            Some(Value::Bool(b)) => Some(math::bool_to_int(b)),
            _ => None,
        }
    }
}

fn thunk<T, F>(f: F) -> Thunk<T>
where
    F: Fn(&[Value]) -> Result<T, FastPathFailure> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn map1<A: 'static, B: 'static>(
    a: Thunk<A>,
    f: impl Fn(A) -> Result<B, RowError> + Send + Sync + 'static,
) -> Thunk<B> {
    thunk(move |row| Ok(f(a(row)?)?))
}

fn map2<A: 'static, B: 'static, C: 'static>(
    a: Thunk<A>,
    b: Thunk<B>,
    f: impl Fn(A, B) -> Result<C, RowError> + Send + Sync + 'static,
) -> Thunk<C> {
    thunk(move |row| {
        let x = a(row)?;
        let y = b(row)?;
        Ok(f(x, y)?)
    })
}

fn value_at<'r>(row: &'r [Value], path: &[usize]) -> Option<&'r Value> {
    let (first, rest) = path.split_first()?;
    let mut v = row.get(*first)?;
    for j in rest {
        v = match v {
            Value::Tuple(items) => items.get(*j)?,
            _ => return None,
        };
    }
    Some(v)
}

/// Column (or nested tuple element) reader for a known type.
fn accessor(path: Vec<usize>, ty: &Type) -> Result<Lowered, Unspecializable> {
    let shape = match ty {
        Type::Bool => Shape::Bool(thunk(move |row| match value_at(row, &path) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(FastPathFailure::nonconforming()),
        })),
        Type::Int => Shape::Int(thunk(move |row| match value_at(row, &path) {
            Some(Value::Int(i)) => Ok(*i),
            _ => Err(FastPathFailure::nonconforming()),
        })),
        Type::Float => Shape::Float(thunk(move |row| match value_at(row, &path) {
            Some(Value::Float(f)) => Ok(*f),
            _ => Err(FastPathFailure::nonconforming()),
        })),
        Type::Str => Shape::Str(thunk(move |row| match value_at(row, &path) {
            Some(Value::Str(s)) => Ok(s.clone()),
            _ => Err(FastPathFailure::nonconforming()),
        })),
        Type::Tuple(items) => Shape::Tuple(
            items
                .iter()
                .enumerate()
                .map(|(j, t)| {
                    let mut p = path.clone();
                    p.push(j);
                    accessor(p, t)
                })
                .collect::<Result<_, _>>()?,
        ),
        Type::Unknown => return decline("unknown column type"),
    };
    Ok(Lowered::pure(shape))
}

fn constant(v: &Value) -> Lowered {
    let shape = match v.clone() {
        Value::Bool(b) => Shape::Bool(thunk(move |_| Ok(b))),
        Value::Int(i) => Shape::Int(thunk(move |_| Ok(i))),
        Value::Float(f) => Shape::Float(thunk(move |_| Ok(f))),
        Value::Str(s) => Shape::Str(thunk(move |_| Ok(s.clone()))),
        Value::Tuple(items) => Shape::Tuple(items.iter().map(constant).collect()),
    };
    Lowered {
        shape,
        pure: true,
        constant: Some(v.clone()),
    }
}

fn into_value(l: Lowered) -> Thunk<Value> {
    match l.shape {
        Shape::Bool(t) => thunk(move |row| t(row).map(Value::Bool)),
        Shape::Int(t) => thunk(move |row| t(row).map(Value::Int)),
        Shape::Float(t) => thunk(move |row| t(row).map(Value::Float)),
        Shape::Str(t) => thunk(move |row| t(row).map(Value::Str)),
        Shape::Tuple(items) => {
            let items: Vec<Thunk<Value>> = items.into_iter().map(into_value).collect();
            thunk(move |row| {
                items
                    .iter()
                    .map(|t| t(row))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Tuple)
            })
        }
    }
}

/// Evaluate for failures only.
fn check(l: &Lowered) -> Thunk<()> {
    match &l.shape {
        Shape::Bool(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(drop))
        }
        Shape::Int(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(drop))
        }
        Shape::Float(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(drop))
        }
        Shape::Str(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(drop))
        }
        Shape::Tuple(items) => {
            let checks: Vec<Thunk<()>> = items.iter().map(check).collect();
            thunk(move |row| checks.iter().try_for_each(|c| c(row)))
        }
    }
}

/// Constant derived from a tuple's structure; fallible elements still run first.
fn tuple_constant<T: Clone + Send + Sync + 'static>(items: &[Lowered], value: T) -> Thunk<T> {
    if items.iter().all(|i| i.pure) {
        return thunk(move |_| Ok(value.clone()));
    }
    let checks: Vec<Thunk<()>> = items.iter().map(check).collect();
    thunk(move |row| {
        checks.iter().try_for_each(|c| c(row))?;
        Ok(value.clone())
    })
}

enum NumView {
    Int(Thunk<i64>),
    Float(Thunk<f64>),
}

impl NumView {
    fn into_f64(self) -> Thunk<f64> {
        match self {
            NumView::Int(t) => thunk(move |row| t(row).map(|i| i as f64)),
            NumView::Float(t) => t,
        }
    }
}

/// Booleans read as 0/1 integers.
fn num_view(l: &Lowered) -> Option<NumView> {
    match &l.shape {
        Shape::Bool(t) => {
            let t = t.clone();
            Some(NumView::Int(thunk(move |row| {
                t(row).map(math::bool_to_int)
            })))
        }
        Shape::Int(t) => Some(NumView::Int(t.clone())),
        Shape::Float(t) => Some(NumView::Float(t.clone())),
        _ => None,
    }
}

fn truthy(l: &Lowered) -> Thunk<bool> {
    match &l.shape {
        Shape::Bool(t) => t.clone(),
        Shape::Int(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(|i| i != 0))
        }
        Shape::Float(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(|f| f != 0.0))
        }
        Shape::Str(t) => {
            let t = t.clone();
            thunk(move |row| t(row).map(|s| !s.is_empty()))
        }
        Shape::Tuple(items) => tuple_constant(items, !items.is_empty()),
    }
}

fn select<T: 'static>(cond: Thunk<bool>, a: Thunk<T>, b: Thunk<T>) -> Thunk<T> {
    thunk(move |row| if cond(row)? { a(row) } else { b(row) })
}

/// `and` (`take_rhs_if_truthy = true`) and `or` over operands of one type.
fn short_circuit<T: 'static>(
    a: Thunk<T>,
    b: Thunk<T>,
    is_truthy: fn(&T) -> bool,
    take_rhs_if_truthy: bool,
) -> Thunk<T> {
    thunk(move |row| {
        let x = a(row)?;
        if is_truthy(&x) == take_rhs_if_truthy {
            b(row)
        } else {
            Ok(x)
        }
    })
}

fn extremum<T: 'static>(items: Vec<Thunk<T>>, better: fn(&T, &T) -> bool) -> Thunk<T> {
    thunk(move |row| {
        let mut best: Option<T> = None;
        for t in &items {
            let v = t(row)?;
            best = match best {
                Some(b) if !better(&v, &b) => Some(b),
                _ => Some(v),
            };
        }
        best.ok_or(FastPathFailure {
            reason: FailureReason::Domain,
        })
    })
}

#[derive(Clone)]
enum Scalar {
    Num(Num),
    Str(String),
}

fn scalar(l: &Lowered) -> Option<Thunk<Scalar>> {
    if let Shape::Str(t) = &l.shape {
        let t = t.clone();
        return Some(thunk(move |row| t(row).map(Scalar::Str)));
    }
    Some(match num_view(l)? {
        NumView::Int(t) => thunk(move |row| t(row).map(|i| Scalar::Num(Num::Int(i)))),
        NumView::Float(t) => thunk(move |row| t(row).map(|f| Scalar::Num(Num::Float(f)))),
    })
}

/// Same outcome as the general evaluator's comparison for two scalars.
fn scalar_cmp(op: CmpOp, a: &Scalar, b: &Scalar) -> bool {
    match (a, b) {
        (Scalar::Num(x), Scalar::Num(y)) => match math::compare(*x, *y) {
            Some(ord) => op.test(ord),
            None => op == CmpOp::Ne,
        },
        (Scalar::Str(x), Scalar::Str(y)) => op.test(x.cmp(y)),
        _ => op == CmpOp::Ne,
    }
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

struct Lowerer {
    params: Vec<Lowered>,
}

impl Lowerer {
    fn lower(&self, expr: &Expr) -> Result<Lowered, Unspecializable> {
        match expr {
            Expr::Const(v) => Ok(constant(v)),
            Expr::Param(i) => match self.params.get(*i) {
                Some(p) => Ok(p.clone()),
                None => decline(format!("parameter {i} is not bound")),
            },
            Expr::Unary(op, e) => self.unary(*op, self.lower(e)?),
            Expr::Binary(op, a, b) => self.binary(*op, self.lower(a)?, self.lower(b)?),
            Expr::Compare(first, links) => self.compare(first, links),
            Expr::And(a, b) => self.logic(self.lower(a)?, self.lower(b)?, true),
            Expr::Or(a, b) => self.logic(self.lower(a)?, self.lower(b)?, false),
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                let c = truthy(&self.lower(cond)?);
                let shape = match (self.lower(then)?.shape, self.lower(otherwise)?.shape) {
                    (Shape::Bool(a), Shape::Bool(b)) => Shape::Bool(select(c, a, b)),
                    (Shape::Int(a), Shape::Int(b)) => Shape::Int(select(c, a, b)),
                    (Shape::Float(a), Shape::Float(b)) => Shape::Float(select(c, a, b)),
                    (Shape::Str(a), Shape::Str(b)) => Shape::Str(select(c, a, b)),
                    _ => return decline("conditional arms have different types"),
                };
                Ok(Lowered::computed(shape))
            }
            Expr::Call(f, args) => {
                let args = args
                    .iter()
                    .map(|a| self.lower(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(*f, args)
            }
            Expr::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|e| self.lower(e))
                    .collect::<Result<Vec<_>, _>>()?;
                let pure = items.iter().all(|i| i.pure);
                Ok(Lowered {
                    shape: Shape::Tuple(items),
                    pure,
                    constant: None,
                })
            }
            Expr::Index(base, idx) => self.index(self.lower(base)?, self.lower(idx)?),
            Expr::Field(_, name) => decline(format!("unbound column '{name}'")),
        }
    }

    fn unary(&self, op: UnaryOp, v: Lowered) -> Result<Lowered, Unspecializable> {
        let shape = match (op, v.shape.clone()) {
            (UnaryOp::Not, _) => {
                let t = truthy(&v);
                Shape::Bool(thunk(move |row| t(row).map(|b| !b)))
            }
            (UnaryOp::Neg, Shape::Float(t)) => Shape::Float(thunk(move |row| t(row).map(|f| -f))),
            (UnaryOp::Neg, _) => match num_view(&v) {
                Some(NumView::Int(t)) => Shape::Int(map1(t, math::int_neg)),
                _ => return decline("unary - on a non-number"),
            },
            (UnaryOp::Pos, Shape::Float(t)) => Shape::Float(t),
            (UnaryOp::Pos, _) => match num_view(&v) {
                Some(NumView::Int(t)) => Shape::Int(t),
                _ => return decline("unary + on a non-number"),
            },
        };
        Ok(Lowered::computed(shape))
    }

    fn binary(&self, op: BinaryOp, a: Lowered, b: Lowered) -> Result<Lowered, Unspecializable> {
        if let (Some(x), Some(y)) = (num_view(&a), num_view(&b)) {
            let shape = match (x, y) {
                (NumView::Int(x), NumView::Int(y)) => match op {
                    BinaryOp::Add => Shape::Int(map2(x, y, math::int_add)),
                    BinaryOp::Sub => Shape::Int(map2(x, y, math::int_sub)),
                    BinaryOp::Mul => Shape::Int(map2(x, y, math::int_mul)),
                    BinaryOp::Div => Shape::Float(map2(x, y, math::int_true_div)),
                    BinaryOp::FloorDiv => Shape::Int(map2(x, y, math::int_floor_div)),
                    BinaryOp::Mod => Shape::Int(map2(x, y, math::int_mod)),
                    BinaryOp::Pow => match b.const_int() {
                        Some(e) if e >= 0 => Shape::Int(map1(x, move |v| math::int_pow(v, e))),
                        Some(e) => Shape::Float(map1(x, move |v| math::int_pow_negative(v, e))),
                        None => return decline("integer power with a run-time exponent"),
                    },
                },
                (x, y) => Shape::Float(map2(x.into_f64(), y.into_f64(), move |p, q| {
                    eval::float_binary(op, p, q)
                })),
            };
            return Ok(Lowered::computed(shape));
        }

        let shape = match (op, &a.shape, &b.shape) {
            (BinaryOp::Add, Shape::Str(x), Shape::Str(y)) => {
                Shape::Str(map2(x.clone(), y.clone(), |p, q| Ok(format!("{p}{q}"))))
            }
            (BinaryOp::Mul, Shape::Str(s), _) => match num_view(&b) {
                Some(NumView::Int(n)) => {
                    Shape::Str(map2(s.clone(), n, |s, n| eval::repeat_str(&s, n)))
                }
                _ => return decline("string repetition by a non-integer"),
            },
            (BinaryOp::Mul, _, Shape::Str(s)) => match num_view(&a) {
                Some(NumView::Int(n)) => {
                    Shape::Str(map2(n, s.clone(), |n, s| eval::repeat_str(&s, n)))
                }
                _ => return decline("string repetition by a non-integer"),
            },
            (BinaryOp::Add, Shape::Tuple(x), Shape::Tuple(y)) => {
                return Ok(Lowered {
                    shape: Shape::Tuple(x.iter().chain(y).cloned().collect()),
                    pure: a.pure && b.pure,
                    constant: None,
                });
            }
            (BinaryOp::Mul, Shape::Tuple(items), _) => {
                let Some(n) = b.const_int() else {
                    return decline("tuple repetition by a run-time count");
                };
                let Ok(out) = eval::repeat_items(items, n) else {
                    return decline("tuple repetition too long");
                };
                return Ok(Lowered {
                    shape: Shape::Tuple(out),
                    pure: a.pure,
                    constant: None,
                });
            }
            _ => return decline(format!("operator {} on these operand types", op.symbol())),
        };
        Ok(Lowered::computed(shape))
    }

    fn compare(&self, first: &Expr, links: &[(CmpOp, Expr)]) -> Result<Lowered, Unspecializable> {
        let head = self.lower(first)?;
        let Some(first_t) = scalar(&head) else {
            return decline("comparison of tuples");
        };
        let mut prev_is_str = matches!(head.shape, Shape::Str(_));
        let mut chain = Vec::with_capacity(links.len());
        for (op, e) in links {
            let rhs = self.lower(e)?;
            let Some(t) = scalar(&rhs) else {
                return decline("comparison of tuples");
            };
            let is_str = matches!(rhs.shape, Shape::Str(_));
            if is_str != prev_is_str && !matches!(op, CmpOp::Eq | CmpOp::Ne) {
                return decline("ordering between a string and a number");
            }
            chain.push((*op, t));
            prev_is_str = is_str;
        }
        Ok(Lowered::computed(Shape::Bool(thunk(move |row| {
            let mut lhs = first_t(row)?;
            for (op, t) in &chain {
                let rhs = t(row)?;
                if !scalar_cmp(*op, &lhs, &rhs) {
                    return Ok(false);
                }
                lhs = rhs;
            }
            Ok(true)
        }))))
    }

    fn logic(&self, a: Lowered, b: Lowered, is_and: bool) -> Result<Lowered, Unspecializable> {
        let shape = match (a.shape, b.shape) {
            (Shape::Bool(x), Shape::Bool(y)) => Shape::Bool(short_circuit(x, y, |v| *v, is_and)),
            (Shape::Int(x), Shape::Int(y)) => Shape::Int(short_circuit(x, y, |v| *v != 0, is_and)),
            (Shape::Float(x), Shape::Float(y)) => {
                Shape::Float(short_circuit(x, y, |v| *v != 0.0, is_and))
            }
            (Shape::Str(x), Shape::Str(y)) => {
                Shape::Str(short_circuit(x, y, |v| !v.is_empty(), is_and))
            }
            _ => return decline("and/or over operands of different types"),
        };
        Ok(Lowered::computed(shape))
    }

    fn index(&self, base: Lowered, idx: Lowered) -> Result<Lowered, Unspecializable> {
        match base.shape {
            Shape::Tuple(items) => {
                let Some(i) = idx.const_int() else {
                    return decline("tuple index is not a constant");
                };
                let Some(pos) = resolve_index(items.len(), i) else {
                    return decline("tuple index out of range");
                };
                let picked = items[pos].clone();
                let others: Vec<&Lowered> = items
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != pos)
                    .map(|(_, l)| l)
                    .collect();
                if others.iter().all(|l| l.pure) {
                    return Ok(picked);
                }
                // Siblings may fail; they must still run.
                let checks: Vec<Thunk<()>> = others.into_iter().map(check).collect();
                let guard = thunk(move |row| checks.iter().try_for_each(|c| c(row)));
                let shape = match picked.shape {
                    Shape::Bool(t) => Shape::Bool(map_guarded(guard, t)),
                    Shape::Int(t) => Shape::Int(map_guarded(guard, t)),
                    Shape::Float(t) => Shape::Float(map_guarded(guard, t)),
                    Shape::Str(t) => Shape::Str(map_guarded(guard, t)),
                    Shape::Tuple(_) => return decline("nested tuple picked from a fallible tuple"),
                };
                Ok(Lowered::computed(shape))
            }
            Shape::Str(s) => {
                let Some(NumView::Int(i)) = num_view(&idx) else {
                    return decline("string index is not an integer");
                };
                Ok(Lowered::computed(Shape::Str(map2(s, i, |s, i| {
                    let len = s.chars().count();
                    resolve_index(len, i)
                        .and_then(|p| s.chars().nth(p))
                        .map(String::from)
                        .ok_or_else(|| RowError::index("string index out of range"))
                }))))
            }
            _ => decline("subscript of a number"),
        }
    }

    fn call(&self, f: Builtin, args: Vec<Lowered>) -> Result<Lowered, Unspecializable> {
        if !f.accepts_args(args.len()) {
            return decline(format!("{}() with {} argument(s)", f.name(), args.len()));
        }
        if let Some(op) = eval::float_fn2(f).filter(|_| args.len() == 2) {
            let (Some(x), Some(y)) = (num_view(&args[0]), num_view(&args[1])) else {
                return decline(format!("{}() of a non-number", f.name()));
            };
            return Ok(Lowered::computed(Shape::Float(map2(
                x.into_f64(),
                y.into_f64(),
                op,
            ))));
        }
        if let Some(op) = eval::float_fn1(f).filter(|_| args.len() == 1) {
            let Some(x) = num_view(&args[0]) else {
                return decline(format!("{}() of a non-number", f.name()));
            };
            return Ok(Lowered::computed(Shape::Float(map1(x.into_f64(), op))));
        }
        if let Some(op) = eval::integral_fn(f) {
            let shape = match num_view(&args[0]) {
                Some(NumView::Int(t)) => Shape::Int(t),
                Some(NumView::Float(t)) => Shape::Int(map1(t, op)),
                None => return decline(format!("{}() of a non-number", f.name())),
            };
            return Ok(Lowered::computed(shape));
        }
        if let Some(pred) = eval::predicate_fn(f) {
            let Some(x) = num_view(&args[0]) else {
                return decline(format!("{}() of a non-number", f.name()));
            };
            let x = x.into_f64();
            return Ok(Lowered::computed(Shape::Bool(thunk(move |row| {
                x(row).map(pred)
            }))));
        }

        let shape = match f {
            Builtin::Abs => match num_view(&args[0]) {
                Some(NumView::Int(t)) => Shape::Int(map1(t, math::int_abs)),
                Some(NumView::Float(t)) => Shape::Float(thunk(move |row| t(row).map(f64::abs))),
                None => return decline("abs() of a non-number"),
            },
            Builtin::Min | Builtin::Max => return self.extremum(f == Builtin::Max, args),
            Builtin::Int => match args.first().map(|a| (&a.shape, num_view(a))) {
                None => Shape::Int(thunk(|_| Ok(0))),
                Some((Shape::Str(s), _)) => Shape::Int(map1(s.clone(), |s| math::parse_int(&s))),
                Some((_, Some(NumView::Int(t)))) => Shape::Int(t),
                Some((_, Some(NumView::Float(t)))) => Shape::Int(map1(t, math::float_to_int)),
                Some(_) => return decline("int() of a tuple"),
            },
            Builtin::Float => match args.first().map(|a| (&a.shape, num_view(a))) {
                None => Shape::Float(thunk(|_| Ok(0.0))),
                Some((Shape::Str(s), _)) => {
                    Shape::Float(map1(s.clone(), |s| math::parse_float(&s)))
                }
                Some((_, Some(n))) => Shape::Float(n.into_f64()),
                Some(_) => return decline("float() of a tuple"),
            },
            Builtin::Bool => match args.first() {
                None => Shape::Bool(thunk(|_| Ok(false))),
                Some(a) => Shape::Bool(truthy(a)),
            },
            Builtin::Str => match args.into_iter().next() {
                None => Shape::Str(thunk(|_| Ok(String::new()))),
                Some(Lowered {
                    shape: Shape::Str(t),
                    ..
                }) => Shape::Str(t),
                Some(a) => {
                    let v = into_value(a);
                    Shape::Str(thunk(move |row| v(row).map(|v| v.to_string())))
                }
            },
            Builtin::Len => match &args[0].shape {
                Shape::Str(t) => {
                    let t = t.clone();
                    Shape::Int(thunk(move |row| t(row).map(|s| s.chars().count() as i64)))
                }
                Shape::Tuple(items) => Shape::Int(tuple_constant(items, items.len() as i64)),
                _ => return decline("len() of a number"),
            },
            other => return decline(format!("{}() with {} argument(s)", other.name(), args.len())),
        };
        Ok(Lowered::computed(shape))
    }

    fn extremum(&self, is_max: bool, args: Vec<Lowered>) -> Result<Lowered, Unspecializable> {
        let items = if let [
            Lowered {
                shape: Shape::Tuple(items),
                ..
            },
        ] = args.as_slice()
        {
            items.clone()
        } else if args.len() == 1 {
            return decline("min()/max() of a scalar");
        } else {
            args
        };
        if items.is_empty() {
            return decline("min()/max() of an empty tuple");
        }

        macro_rules! pick {
            ($variant:ident, $t:ty) => {{
                let mut thunks = Vec::with_capacity(items.len());
                for item in &items {
                    match &item.shape {
                        Shape::$variant(t) => thunks.push(t.clone()),
                        _ => return decline("min()/max() over mixed types"),
                    }
                }
                let better: fn(&$t, &$t) -> bool =
                    if is_max { |a, b| a > b } else { |a, b| a < b };
                Shape::$variant(extremum(thunks, better))
            }};
        }

        let shape = match &items[0].shape {
            Shape::Bool(_) => pick!(Bool, bool),
            Shape::Int(_) => pick!(Int, i64),
            Shape::Float(_) => pick!(Float, f64),
            Shape::Str(_) => pick!(Str, String),
            Shape::Tuple(_) => return decline("min()/max() over tuples"),
        };
        Ok(Lowered::computed(shape))
    }
}

fn map_guarded<T: 'static>(guard: Thunk<()>, t: Thunk<T>) -> Thunk<T> {
    thunk(move |row| {
        guard(row)?;
        t(row)
    })
}
