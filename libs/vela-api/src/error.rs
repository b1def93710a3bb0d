use std::fmt;
use std::str::FromStr;

/// Error kind for row-level failures.
///
/// `Type` and `Arity` are contract violations and abort a stage; the others
/// depend on the data and may be resolved or ignored per stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Mathematically undefined operation (`log(-1)`, `sqrt(-1)`, `asin(2)`).
    Domain,
    ZeroDivision,
    /// Result outside the representable range (i64 overflow, finite input overflowing to inf).
    Overflow,
    Index,
    /// Failed conversion (`int("abc")`, `int(nan)`).
    Conversion,
    /// Unsupported operand types.
    Type,
    /// UDF parameter count does not match the row.
    Arity,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Domain,
        ErrorKind::ZeroDivision,
        ErrorKind::Overflow,
        ErrorKind::Index,
        ErrorKind::Conversion,
        ErrorKind::Type,
        ErrorKind::Arity,
    ];

    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Type | ErrorKind::Arity)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Domain => "domain",
            ErrorKind::ZeroDivision => "zero_division",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Index => "index",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Type => "type",
            ErrorKind::Arity => "arity",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown error kind: '{s}'"))
    }
}

/// Row-level error produced by the math library and the evaluators.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RowError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain, msg)
    }

    pub fn zero_division(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivision, msg)
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overflow, msg)
    }

    pub fn index(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, msg)
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conversion, msg)
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, msg)
    }

    pub fn arity(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Arity, msg)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RowError {}
