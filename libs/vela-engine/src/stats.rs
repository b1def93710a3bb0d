use std::collections::BTreeMap;

use serde::Serialize;
use vela_api::ErrorKind;

/// Row counters for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageStats {
    pub name: String,
    pub rows_in: usize,
    pub rows_out: usize,
    /// Rows answered by the compiled fast path.
    pub fast_path: usize,
    /// Rows whose fast path failed and that the general path then handled.
    pub fallback: usize,
    /// Rows evaluated without a fast path (no compiled function for the partition).
    pub general_only: usize,
    pub resolved: usize,
    pub ignored: usize,
    /// General-path failures by kind, resolved and ignored rows included.
    pub exceptions: BTreeMap<ErrorKind, usize>,
}

impl StageStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn record_exception(&mut self, kind: ErrorKind) {
        *self.exceptions.entry(kind).or_insert(0) += 1;
    }

    /// Fold in counters from one batch.
    pub(crate) fn merge(&mut self, other: &StageStats) {
        self.rows_in += other.rows_in;
        self.rows_out += other.rows_out;
        self.fast_path += other.fast_path;
        self.fallback += other.fallback;
        self.general_only += other.general_only;
        self.resolved += other.resolved;
        self.ignored += other.ignored;
        for (kind, n) in &other.exceptions {
            *self.exceptions.entry(*kind).or_insert(0) += n;
        }
    }
}

/// Counters for a whole pipeline execution, one entry per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub stages: Vec<StageStats>,
}

impl ExecutionStats {
    /// Stage name to failure counts; stages without failures are left out.
    pub fn exception_counts(&self) -> BTreeMap<String, BTreeMap<ErrorKind, usize>> {
        self.stages
            .iter()
            .filter(|s| !s.exceptions.is_empty())
            .map(|s| (s.name.clone(), s.exceptions.clone()))
            .collect()
    }

    pub fn total_exceptions(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.exceptions.values())
            .sum()
    }
}
