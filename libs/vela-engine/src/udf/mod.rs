//! User-defined functions: lambda text or IR built in Rust.

pub mod ir;
mod lexer;
mod parser;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use vela_api::Value;

pub use ir::{BinaryOp, Builtin, CmpOp, Expr, UnaryOp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UdfError {
    #[error("parse error at line {line}, col {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("body references parameter {index} but the function takes {arity}")]
    UnboundParam { index: usize, arity: usize },

    #[error("{function}() does not take {count} argument(s)")]
    ArgCount { function: &'static str, count: usize },

    #[error("column access by name ('{0}') on a dataset without column names")]
    NoColumns(String),

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// Identity of a UDF, used as the specialization cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UdfId(u64);

impl UdfId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        UdfId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for UdfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "udf#{}", self.0)
    }
}

/// A function applied to rows. Arity is the number of parameters.
#[derive(Debug, Clone)]
pub struct Udf {
    id: UdfId,
    params: Vec<String>,
    body: Expr,
    source: Option<String>,
}

impl Udf {
    /// Parse lambda text such as `lambda x, y: math.pow(x, y)`.
    pub fn parse(source: &str) -> Result<Self, UdfError> {
        let (params, body) = parser::parse_lambda(source)?;
        Ok(Self {
            id: UdfId::next(),
            params,
            body,
            source: Some(source.trim().to_string()),
        })
    }

    /// Build from IR. Every [`Expr::Param`] must be below the parameter count.
    pub fn new<S: Into<String>>(
        params: impl IntoIterator<Item = S>,
        body: Expr,
    ) -> Result<Self, UdfError> {
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        if let Some(index) = body.max_param().filter(|i| *i >= params.len()) {
            return Err(UdfError::UnboundParam {
                index,
                arity: params.len(),
            });
        }
        let mut bad_call = None;
        body.visit(&mut |e| {
            if let Expr::Call(f, args) = e {
                if bad_call.is_none() && !f.accepts_args(args.len()) {
                    bad_call = Some(UdfError::ArgCount {
                        function: f.name(),
                        count: args.len(),
                    });
                }
            }
        });
        if let Some(err) = bad_call {
            return Err(err);
        }
        Ok(Self {
            id: UdfId::next(),
            params,
            body,
            source: None,
        })
    }

    pub fn id(&self) -> UdfId {
        self.id
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn has_named_columns(&self) -> bool {
        let mut found = false;
        self.body.visit(&mut |e| found |= matches!(e, Expr::Field(..)));
        found
    }

    /// Resolve `row['name']` accesses against the dataset's column names.
    ///
    /// Returns `self` unchanged when the body has no named access; otherwise a
    /// new UDF (fresh identity) with every access turned into a positional index.
    pub fn bind_columns(&self, columns: Option<&[String]>) -> Result<Udf, UdfError> {
        if !self.has_named_columns() {
            return Ok(self.clone());
        }
        let body = self.body.clone().try_rewrite(&mut |e| match e {
            Expr::Field(base, name) => {
                let Some(columns) = columns else {
                    return Err(UdfError::NoColumns(name));
                };
                let pos = columns
                    .iter()
                    .position(|c| *c == name)
                    .ok_or(UdfError::UnknownColumn(name))?;
                Ok(Expr::Index(base, Box::new(Expr::Const(Value::Int(pos as i64)))))
            }
            other => Ok(other),
        })?;
        Ok(Self {
            id: UdfId::next(),
            params: self.params.clone(),
            body,
            source: self.source.clone(),
        })
    }
}

impl fmt::Display for Udf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => f.write_str(src),
            None => write!(f, "<{}/{}>", self.id, self.arity()),
        }
    }
}

impl std::str::FromStr for Udf {
    type Err = UdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Udf::parse(s)
    }
}
