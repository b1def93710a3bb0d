use std::fmt;

use crate::value::Value;

/// Type tag of a single value position.
///
/// `Unknown` is the unspecialized sentinel: the position is deferred to the
/// general evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Bool,
    Int,
    Float,
    Str,
    Tuple(Vec<Type>),
    Unknown,
}

impl Type {
    /// True if this type and all nested element types are known.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Unknown => false,
            Type::Tuple(items) => items.iter().all(Type::is_concrete),
            _ => true,
        }
    }

    /// Bool, Int and Float take part in arithmetic.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Bool | Type::Int | Type::Float)
    }

    /// Whether `value` has exactly this type. `Unknown` accepts anything.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Type::Unknown, _) => true,
            (Type::Bool, Value::Bool(_))
            | (Type::Int, Value::Int(_))
            | (Type::Float, Value::Float(_))
            | (Type::Str, Value::Str(_)) => true,
            (Type::Tuple(types), Value::Tuple(items)) => {
                types.len() == items.len() && types.iter().zip(items).all(|(t, v)| t.accepts(v))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("i64"),
            Type::Float => f.write_str("f64"),
            Type::Str => f.write_str("str"),
            Type::Unknown => f.write_str("?"),
            Type::Tuple(items) => write_list(f, items),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
    f.write_str("(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

/// Shape of one row: a type per column position.
///
/// `Unspecialized` is used when no common width could be established (empty
/// sample, rows of different arity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schema {
    Unspecialized,
    Row(Vec<Type>),
}

impl Schema {
    pub fn row(types: impl IntoIterator<Item = Type>) -> Self {
        Schema::Row(types.into_iter().collect())
    }

    pub fn columns(&self) -> Option<&[Type]> {
        match self {
            Schema::Row(types) => Some(types),
            Schema::Unspecialized => None,
        }
    }

    pub fn width(&self) -> Option<usize> {
        self.columns().map(<[Type]>::len)
    }

    /// Every position known, so a fast path may be built for it.
    pub fn is_specialized(&self) -> bool {
        self.columns()
            .is_some_and(|cols| cols.iter().all(Type::is_concrete))
    }

    /// Whether a row matches this schema position by position.
    pub fn conforms(&self, row: &[Value]) -> bool {
        match self {
            Schema::Unspecialized => false,
            Schema::Row(types) => {
                types.len() == row.len() && types.iter().zip(row).all(|(t, v)| t.accepts(v))
            }
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Unspecialized => f.write_str("<unspecialized>"),
            Schema::Row(types) => write_list(f, types),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conformance_is_exact() {
        let schema = Schema::row([Type::Float, Type::Int]);
        assert!(schema.conforms(&[Value::Float(1.0), Value::Int(2)]));
        assert!(!schema.conforms(&[Value::Float(1.0), Value::Bool(true)]));
        assert!(!schema.conforms(&[Value::Float(1.0)]));
        assert!(!Schema::Unspecialized.conforms(&[]));
    }

    #[test]
    fn specialization_requires_known_positions() {
        assert!(Schema::row([Type::Tuple(vec![Type::Int, Type::Str])]).is_specialized());
        assert!(!Schema::row([Type::Int, Type::Unknown]).is_specialized());
        assert!(!Schema::row([Type::Tuple(vec![Type::Unknown])]).is_specialized());
        assert!(!Schema::Unspecialized.is_specialized());
    }

    #[test]
    fn display() {
        let schema = Schema::row([Type::Float, Type::Tuple(vec![Type::Int, Type::Unknown])]);
        assert_eq!(schema.to_string(), "(f64, (i64, ?))");
    }
}
