use std::fmt;
use std::ops::Deref;

use serde::de::{self, Deserialize, Deserializer, SeqAccess, Visitor};

use crate::format::{format_float, quote_str};
use crate::schema::Type;

/// Runtime value flowing through a pipeline.
///
/// Strategy by type:
/// - Scalars (Bool, Int, Float): stored inline, 64-bit
/// - String: owned UTF-8
/// - Tuple: recursive, arity fixed at construction, heterogeneous elements
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
}

impl Value {
    /// Concrete type tag of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::Tuple(items) => Type::Tuple(items.iter().map(Value::type_of).collect()),
        }
    }

    /// Truthiness: zero, empty string and empty tuple are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Quoted representation used when the value is nested inside a tuple.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote_str(s),
            other => other.to_string(),
        }
    }

    /// Structural equality where floats compare by bit pattern (`nan` equals itself).
    pub fn bit_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.bit_eq(y))
            }
            (a, b) => a == b,
        }
    }

    /// Feed a bit-exact fingerprint of the value into `state`. Consistent with [`Value::bit_eq`].
    pub fn hash_bits<H: std::hash::Hasher>(&self, state: &mut H) {
        use std::hash::Hash;
        match self {
            Value::Bool(b) => (0u8, b).hash(state),
            Value::Int(i) => (1u8, i).hash(state),
            Value::Float(f) => (2u8, f.to_bits()).hash(state),
            Value::Str(s) => (3u8, s).hash(state),
            Value::Tuple(items) => {
                (4u8, items.len()).hash(state);
                for item in items {
                    item.hash_bits(state);
                }
            }
        }
    }

    /// JSON rendering. Non-finite floats become their string tokens.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(format_float(*f))),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Tuple(v)
    }
}

macro_rules! tuple_from {
    ($($name:ident),+) => {
        impl<$($name: Into<Value>),+> From<($($name,)+)> for Value {
            #[allow(non_snake_case)]
            fn from(($($name,)+): ($($name,)+)) -> Self {
                Value::Tuple(vec![$($name.into()),+])
            }
        }
    };
}

tuple_from!(A, B);
tuple_from!(A, B, C);
tuple_from!(A, B, C, D);

// ---------------------------------------------------------------------------
// Deserialize: job files carry literal rows (TOML, HCL, JSON)
// ---------------------------------------------------------------------------

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a bool, integer, float, string or array")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Int)
                    .map_err(|_| E::custom(format!("integer {v} does not fit in i64")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Str(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Tuple(items))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Positional array of column values.
///
/// A source element that is a tuple becomes a multi-column row; anything
/// else becomes a one-column row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Tuple(items) => Row(items),
            other => Row(vec![other]),
        }
    }

    /// Collapse back into a single value: one column stays bare, wider rows become tuples.
    pub fn into_value(self) -> Value {
        let mut cols = self.0;
        if cols.len() == 1 {
            cols.remove(0)
        } else {
            Value::Tuple(cols)
        }
    }

    pub fn width(&self) -> usize {
        self.0.len()
    }
}

impl Deref for Row {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_str_builtin() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Int(-3).to_string(), "-3");
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(
            Value::from((1, "a")).to_string(),
            "(1, 'a')"
        );
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1,)");
    }

    #[test]
    fn rows_flatten_tuples() {
        let row = Row::from_value(Value::from((1.0, 2.0)));
        assert_eq!(row.width(), 2);
        assert_eq!(row.into_value(), Value::from((1.0, 2.0)));

        let single = Row::from_value(Value::Bool(true));
        assert_eq!(single.width(), 1);
        assert_eq!(single.into_value(), Value::Bool(true));
    }

    #[test]
    fn bit_eq_treats_nan_as_equal() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert!(Value::Float(f64::NAN).bit_eq(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).bit_eq(&Value::Float(-0.0)));
    }

    #[test]
    fn deserializes_mixed_literals() {
        let v: Vec<Value> = serde_json::from_str(r#"[1, 2.5, true, "s", [1, false]]"#).unwrap();
        assert_eq!(
            v,
            vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::Bool(true),
                Value::Str("s".into()),
                Value::from((1, false)),
            ]
        );
    }

    #[test]
    fn json_keeps_non_finite_tokens() {
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_json(), serde_json::json!("-inf"));
        assert_eq!(Value::Float(0.5).to_json(), serde_json::json!(0.5));
    }
}
