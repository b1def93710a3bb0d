use std::collections::HashMap;

use vela_api::{Row, Schema, Type, Value};

use crate::config::InferenceConfig;

/// Guesses a partition's row schema from its leading rows.
///
/// A position takes the dominant type of the sample when that type's share
/// reaches `threshold`; otherwise it is [`Type::Unknown`]. The default
/// threshold of 1.0 only specializes unanimous positions.
#[derive(Debug, Clone)]
pub struct TypeInference {
    sample_size: usize,
    threshold: f64,
}

/// Type shape without nested element types; tuples unify element-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Bool,
    Int,
    Float,
    Str,
    Tuple(usize),
}

fn kind_of(v: &Value) -> Kind {
    match v {
        Value::Bool(_) => Kind::Bool,
        Value::Int(_) => Kind::Int,
        Value::Float(_) => Kind::Float,
        Value::Str(_) => Kind::Str,
        Value::Tuple(items) => Kind::Tuple(items.len()),
    }
}

impl TypeInference {
    pub fn new(sample_size: usize, threshold: f64) -> Self {
        Self {
            sample_size,
            threshold,
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.sample_size, config.normal_case_threshold)
    }

    pub fn infer(&self, rows: &[Row]) -> Schema {
        let sample = &rows[..rows.len().min(self.sample_size)];
        if sample.is_empty() {
            return Schema::Unspecialized;
        }

        let Some(width) = self.dominant(sample.iter().map(Row::width)) else {
            return Schema::Unspecialized;
        };
        let rows: Vec<&Row> = sample.iter().filter(|r| r.width() == width).collect();
        Schema::row((0..width).map(|i| {
            let column: Vec<&Value> = rows.iter().map(|r| &r[i]).collect();
            self.unify(&column)
        }))
    }

    /// Most frequent key if its share meets the threshold. Ties go to the first seen.
    fn dominant<K: Copy + Eq + std::hash::Hash>(&self, keys: impl Iterator<Item = K>) -> Option<K> {
        let mut counts: HashMap<K, usize> = HashMap::new();
        let mut order = Vec::new();
        let mut total = 0usize;
        for k in keys {
            total += 1;
            let c = counts.entry(k).or_insert(0);
            if *c == 0 {
                order.push(k);
            }
            *c += 1;
        }
        let mut best: Option<(K, usize)> = None;
        for k in order {
            let c = counts[&k];
            if best.is_none_or(|(_, n)| c > n) {
                best = Some((k, c));
            }
        }
        let (best, count) = best?;
        let share = count as f64 / total as f64;
        (share >= self.threshold).then_some(best)
    }

    fn unify(&self, values: &[&Value]) -> Type {
        let Some(kind) = self.dominant(values.iter().map(|v| kind_of(v))) else {
            return Type::Unknown;
        };
        match kind {
            Kind::Bool => Type::Bool,
            Kind::Int => Type::Int,
            Kind::Float => Type::Float,
            Kind::Str => Type::Str,
            Kind::Tuple(len) => {
                let tuples: Vec<&[Value]> = values
                    .iter()
                    .filter_map(|v| match v {
                        Value::Tuple(items) if items.len() == len => Some(items.as_slice()),
                        _ => None,
                    })
                    .collect();
                Type::Tuple(
                    (0..len)
                        .map(|i| {
                            let column: Vec<&Value> = tuples.iter().map(|t| &t[i]).collect();
                            self.unify(&column)
                        })
                        .collect(),
                )
            }
        }
    }
}

impl Default for TypeInference {
    fn default() -> Self {
        Self::from_config(&InferenceConfig::default())
    }
}
