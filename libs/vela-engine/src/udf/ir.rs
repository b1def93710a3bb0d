use vela_api::Value;

/// Expression tree shared by the specializer and the general evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    /// Positional parameter of the enclosing lambda.
    Param(usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Chained comparison `a < b <= c`: first operand, then `(op, operand)` links.
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call(Builtin, Vec<Expr>),
    Tuple(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    /// `row['name']`; rewritten to [`Expr::Index`] once column names are bound.
    Field(Box<Expr>, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn test(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CmpOp::Eq => ord == Equal,
            CmpOp::Ne => ord != Equal,
            CmpOp::Lt => ord == Less,
            CmpOp::Le => ord != Greater,
            CmpOp::Gt => ord == Greater,
            CmpOp::Ge => ord != Less,
        }
    }
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

/// Callable functions: the `math` module plus a handful of global builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Log,
    Log1p,
    Log2,
    Log10,
    Exp,
    Expm1,
    Pow,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Radians,
    Degrees,
    Fabs,
    Floor,
    Ceil,
    Trunc,
    Hypot,
    Copysign,
    Fmod,
    Isnan,
    Isinf,
    Isfinite,
    // Global builtins.
    Abs,
    Min,
    Max,
    Int,
    Float,
    Bool,
    Str,
    Len,
    Round,
}

const MATH_FUNCTIONS: &[(&str, Builtin)] = &[
    ("log", Builtin::Log),
    ("log1p", Builtin::Log1p),
    ("log2", Builtin::Log2),
    ("log10", Builtin::Log10),
    ("exp", Builtin::Exp),
    ("expm1", Builtin::Expm1),
    ("pow", Builtin::Pow),
    ("sqrt", Builtin::Sqrt),
    ("sin", Builtin::Sin),
    ("cos", Builtin::Cos),
    ("tan", Builtin::Tan),
    ("asin", Builtin::Asin),
    ("acos", Builtin::Acos),
    ("atan", Builtin::Atan),
    ("atan2", Builtin::Atan2),
    ("sinh", Builtin::Sinh),
    ("cosh", Builtin::Cosh),
    ("tanh", Builtin::Tanh),
    ("asinh", Builtin::Asinh),
    ("acosh", Builtin::Acosh),
    ("atanh", Builtin::Atanh),
    ("radians", Builtin::Radians),
    ("degrees", Builtin::Degrees),
    ("fabs", Builtin::Fabs),
    ("floor", Builtin::Floor),
    ("ceil", Builtin::Ceil),
    ("trunc", Builtin::Trunc),
    ("hypot", Builtin::Hypot),
    ("copysign", Builtin::Copysign),
    ("fmod", Builtin::Fmod),
    ("isnan", Builtin::Isnan),
    ("isinf", Builtin::Isinf),
    ("isfinite", Builtin::Isfinite),
];

const GLOBAL_FUNCTIONS: &[(&str, Builtin)] = &[
    ("abs", Builtin::Abs),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("int", Builtin::Int),
    ("float", Builtin::Float),
    ("bool", Builtin::Bool),
    ("str", Builtin::Str),
    ("len", Builtin::Len),
    ("round", Builtin::Round),
];

/// `math` module constants.
pub fn math_constant(name: &str) -> Option<f64> {
    use std::f64::consts;
    match name {
        "pi" => Some(consts::PI),
        "e" => Some(consts::E),
        "tau" => Some(consts::TAU),
        "inf" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    }
}

impl Builtin {
    /// Function reachable as `math.<name>`.
    pub fn math(name: &str) -> Option<Builtin> {
        MATH_FUNCTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| *b)
    }

    /// Function reachable by bare name: global builtins first, then `math` functions.
    pub fn global(name: &str) -> Option<Builtin> {
        GLOBAL_FUNCTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, b)| *b)
            .or_else(|| Builtin::math(name))
    }

    pub fn name(self) -> &'static str {
        MATH_FUNCTIONS
            .iter()
            .chain(GLOBAL_FUNCTIONS)
            .find(|(_, b)| *b == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    /// Accepted argument counts, inclusive. `None` upper bound means variadic.
    pub fn arity(self) -> (usize, Option<usize>) {
        use Builtin::*;
        match self {
            Log => (1, Some(2)),
            Pow | Atan2 | Hypot | Copysign | Fmod => (2, Some(2)),
            Min | Max => (1, None),
            Int | Float | Bool | Str => (0, Some(1)),
            _ => (1, Some(1)),
        }
    }

    pub fn accepts_args(self, n: usize) -> bool {
        let (lo, hi) = self.arity();
        n >= lo && hi.is_none_or(|hi| n <= hi)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn param(i: usize) -> Expr {
    Expr::Param(i)
}

pub fn lit(v: impl Into<Value>) -> Expr {
    Expr::Const(v.into())
}

pub fn call(f: Builtin, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Call(f, args.into_iter().collect())
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

pub fn compare(lhs: Expr, op: CmpOp, rhs: Expr) -> Expr {
    Expr::Compare(Box::new(lhs), vec![(op, rhs)])
}

pub fn index(base: Expr, i: i64) -> Expr {
    Expr::Index(Box::new(base), Box::new(lit(i)))
}

pub fn tuple(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Tuple(items.into_iter().collect())
}

pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::IfElse {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

impl Expr {
    /// Highest parameter index referenced, if any.
    pub fn max_param(&self) -> Option<usize> {
        let mut max = None;
        self.visit(&mut |e| {
            if let Expr::Param(i) = e {
                max = Some(max.map_or(*i, |m: usize| m.max(*i)));
            }
        });
        max
    }

    /// Pre-order traversal.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Const(_) | Expr::Param(_) => {}
            Expr::Unary(_, e) | Expr::Field(e, _) => e.visit(f),
            Expr::Binary(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Index(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Expr::Compare(first, rest) => {
                first.visit(f);
                for (_, e) in rest {
                    e.visit(f);
                }
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                cond.visit(f);
                then.visit(f);
                otherwise.visit(f);
            }
            Expr::Call(_, args) | Expr::Tuple(args) => {
                for a in args {
                    a.visit(f);
                }
            }
        }
    }

    /// Bottom-up rewrite.
    pub fn try_rewrite<E>(self, f: &mut dyn FnMut(Expr) -> Result<Expr, E>) -> Result<Expr, E> {
        fn boxed<E>(e: Box<Expr>, f: &mut dyn FnMut(Expr) -> Result<Expr, E>) -> Result<Box<Expr>, E> {
            e.try_rewrite(f).map(Box::new)
        }
        let node = match self {
            e @ (Expr::Const(_) | Expr::Param(_)) => e,
            Expr::Unary(op, e) => Expr::Unary(op, boxed(e, f)?),
            Expr::Binary(op, a, b) => Expr::Binary(op, boxed(a, f)?, boxed(b, f)?),
            Expr::Compare(first, rest) => {
                let first = boxed(first, f)?;
                let mut links = Vec::with_capacity(rest.len());
                for (op, e) in rest {
                    links.push((op, e.try_rewrite(f)?));
                }
                Expr::Compare(first, links)
            }
            Expr::And(a, b) => Expr::And(boxed(a, f)?, boxed(b, f)?),
            Expr::Or(a, b) => Expr::Or(boxed(a, f)?, boxed(b, f)?),
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => Expr::IfElse {
                cond: boxed(cond, f)?,
                then: boxed(then, f)?,
                otherwise: boxed(otherwise, f)?,
            },
            Expr::Call(b, args) => Expr::Call(b, rewrite_all(args, f)?),
            Expr::Tuple(items) => Expr::Tuple(rewrite_all(items, f)?),
            Expr::Index(a, b) => Expr::Index(boxed(a, f)?, boxed(b, f)?),
            Expr::Field(e, name) => Expr::Field(boxed(e, f)?, name),
        };
        f(node)
    }
}

fn rewrite_all<E>(
    items: Vec<Expr>,
    f: &mut dyn FnMut(Expr) -> Result<Expr, E>,
) -> Result<Vec<Expr>, E> {
    items.into_iter().map(|e| e.try_rewrite(f)).collect()
}
