use std::collections::HashMap;
use std::sync::Arc;

use vela_api::Schema;

use crate::specialize::{CompiledUdf, specialize};
use crate::udf::{Udf, UdfId};

/// Fast paths built during one pipeline execution, keyed by UDF identity and
/// input schema. Declined specializations are remembered too.
#[derive(Debug, Default)]
pub struct SpecializationCache {
    entries: HashMap<(UdfId, Schema), Option<Arc<CompiledUdf>>>,
    hits: usize,
}

impl SpecializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled fast path for `udf` under `schema`, or `None` if it has none.
    pub fn get_or_specialize(&mut self, udf: &Udf, schema: &Schema) -> Option<Arc<CompiledUdf>> {
        let key = (udf.id(), schema.clone());
        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            return entry.clone();
        }
        let entry = match specialize(udf, schema) {
            Ok(compiled) => {
                tracing::debug!(udf = %udf.id(), %schema, output = %compiled.output(), "fast path compiled");
                Some(Arc::new(compiled))
            }
            Err(e) => {
                tracing::debug!(udf = %udf.id(), %schema, reason = %e, "no fast path");
                None
            }
        };
        self.entries.insert(key, entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}
