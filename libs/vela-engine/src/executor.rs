//! Pipeline executor.
//!
//! Each stage runs as a set of blocking tasks, one per row batch, with every
//! partition in flight at once. Tasks own their rows and return them in a
//! slot indexed by (partition, batch), so the merge restores input order no
//! matter which rows took the fast path. The stage ends at the join barrier;
//! the next stage re-infers schemas on the new partitions.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vela_api::{Row, RowError, Schema, Value};

use crate::cache::SpecializationCache;
use crate::config::{EngineConfig, ExecutorConfig};
use crate::error::EngineError;
use crate::eval;
use crate::infer::TypeInference;
use crate::specialize::{CompiledUdf, FailureReason};
use crate::stage::{Handler, Stage, StageKind};
use crate::stats::{ExecutionStats, StageStats};
use crate::udf::Udf;

/// Contiguous run of rows believed to share `schema`.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub rows: Vec<Row>,
    pub schema: Schema,
}

impl Partition {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            schema: Schema::Unspecialized,
        }
    }

    /// Cut `rows` into partitions of at most `size` rows.
    pub fn split(rows: Vec<Row>, size: usize) -> Vec<Partition> {
        let size = size.max(1);
        let mut partitions = Vec::with_capacity(rows.len().div_ceil(size));
        let mut rows = rows.into_iter();
        loop {
            let chunk: Vec<Row> = rows.by_ref().take(size).collect();
            if chunk.is_empty() {
                break;
            }
            partitions.push(Partition::new(chunk));
        }
        partitions
    }
}

/// Status of one row as it moves through a UDF stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionRecord {
    Pending,
    FastPathSucceeded(Value),
    /// Transient: the row is re-dispatched to the general evaluator.
    FastPathFailed(FailureReason),
    GeneralPathSucceeded(Value),
    /// A resolver produced the value after a general-path failure.
    Resolved(Value),
    /// Taken by an ignore handler.
    Dropped,
    /// Ends the stage: a contract violation, or a data failure no handler took.
    Fatal(RowError),
}

impl ExecutionRecord {
    pub fn is_finished(&self) -> bool {
        !matches!(
            self,
            ExecutionRecord::Pending | ExecutionRecord::FastPathFailed(_)
        )
    }
}

enum BatchOutcome {
    Done { rows: Vec<Row>, stats: StageStats },
    Failed { row: usize, error: RowError },
    Cancelled,
}

pub struct Executor {
    config: ExecutorConfig,
    inference: TypeInference,
    fast_path: bool,
    token: CancellationToken,
}

impl Executor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.executor.clone(),
            inference: TypeInference::from_config(&config.inference),
            fast_path: config.fast_path.enabled,
            token: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with the caller.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn infer(&self, rows: &[Row]) -> Schema {
        self.inference.infer(rows)
    }

    /// Run `stages` left to right over `partitions`.
    ///
    /// Either every stage succeeds and the final partitions are returned
    /// (schemas inferred), or the first failing stage's error is.
    pub async fn execute(
        &self,
        mut partitions: Vec<Partition>,
        stages: &[Stage],
    ) -> Result<(Vec<Partition>, ExecutionStats), EngineError> {
        let mut cache = SpecializationCache::new();
        let mut stats = ExecutionStats::default();

        for (index, stage) in stages.iter().enumerate() {
            for partition in &mut partitions {
                partition.schema = self.inference.infer(&partition.rows);
            }
            let (next, stage_stats) = match &stage.kind {
                StageKind::Unique => unique(stage, partitions),
                _ => self.run_stage(index, stage, partitions, &mut cache).await?,
            };
            tracing::info!(
                stage = %stage,
                rows_in = stage_stats.rows_in,
                rows_out = stage_stats.rows_out,
                fast_path = stage_stats.fast_path,
                fallback = stage_stats.fallback,
                general_only = stage_stats.general_only,
                "stage complete"
            );
            partitions = next;
            stats.stages.push(stage_stats);
        }

        for partition in &mut partitions {
            partition.schema = self.inference.infer(&partition.rows);
        }
        tracing::debug!(
            stages = stages.len(),
            compiled = cache.len(),
            cache_hits = cache.hits(),
            "pipeline finished"
        );
        Ok((partitions, stats))
    }

    async fn run_stage(
        &self,
        index: usize,
        stage: &Stage,
        partitions: Vec<Partition>,
        cache: &mut SpecializationCache,
    ) -> Result<(Vec<Partition>, StageStats), EngineError> {
        let plan = Arc::new(stage.clone());
        let first_failure = Arc::new(AtomicUsize::new(usize::MAX));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Vec<Option<Vec<Row>>>> = Vec::with_capacity(partitions.len());
        let mut offset = 0usize;

        for (p, partition) in partitions.into_iter().enumerate() {
            let compiled = match stage.kind.udf() {
                Some(udf) if self.fast_path => {
                    cache.get_or_specialize(udf, &udf_schema(&stage.kind, &partition.schema))
                }
                _ => None,
            };
            tracing::debug!(
                stage = %stage,
                partition = p,
                rows = partition.rows.len(),
                schema = %partition.schema,
                fast_path = compiled.is_some(),
                "partition planned"
            );

            let mut rows = partition.rows.into_iter();
            let mut batches = 0;
            loop {
                let batch: Vec<Row> = rows.by_ref().take(self.config.batch_size).collect();
                if batch.is_empty() {
                    break;
                }
                let start = offset;
                offset += batch.len();

                let plan = plan.clone();
                let compiled = compiled.clone();
                let first_failure = first_failure.clone();
                let token = self.token.clone();
                let b = batches;
                tasks.spawn_blocking(move || {
                    let outcome =
                        run_batch(&plan, compiled.as_deref(), batch, start, &first_failure, &token);
                    (p, b, outcome)
                });
                batches += 1;
            }
            slots.push((0..batches).map(|_| None).collect());
        }

        let mut stats = StageStats::new(&stage.name);
        let mut failure: Option<(usize, RowError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (p, b, outcome) =
                joined.map_err(|e| EngineError::Worker(format!("stage '{stage}': {e}")))?;
            match outcome {
                BatchOutcome::Done { rows, stats: batch } => {
                    stats.merge(&batch);
                    slots[p][b] = Some(rows);
                }
                BatchOutcome::Failed { row, error } => {
                    if failure.as_ref().is_none_or(|(first, _)| row < *first) {
                        failure = Some((row, error));
                    }
                }
                BatchOutcome::Cancelled => {}
            }
        }

        if let Some((row, source)) = failure {
            tracing::warn!(stage = %stage, row, error = %source, "stage failed");
            return Err(EngineError::Stage {
                stage: stage.name.clone(),
                index,
                row,
                source,
            });
        }
        if self.token.is_cancelled() {
            return Err(EngineError::Worker(format!("stage '{stage}': execution cancelled")));
        }

        let mut partitions = Vec::with_capacity(slots.len());
        for batches in slots {
            let mut rows = Vec::new();
            for batch in batches {
                let batch = batch.ok_or_else(|| {
                    EngineError::Worker(format!("stage '{stage}': batch result missing"))
                })?;
                rows.extend(batch);
            }
            if !rows.is_empty() {
                partitions.push(Partition::new(rows));
            }
        }
        Ok((partitions, stats))
    }
}

/// Schema the stage's UDF sees for rows of `schema`.
fn udf_schema(kind: &StageKind, schema: &Schema) -> Schema {
    match kind {
        StageKind::MapColumn { column, .. } => schema
            .columns()
            .and_then(|cols| cols.get(*column))
            .map_or(Schema::Unspecialized, |ty| Schema::row([ty.clone()])),
        _ => schema.clone(),
    }
}

// ---------------------------------------------------------------------------
// Per-batch work (blocking pool)
// ---------------------------------------------------------------------------

fn run_batch(
    stage: &Stage,
    compiled: Option<&CompiledUdf>,
    rows: Vec<Row>,
    start: usize,
    first_failure: &AtomicUsize,
    token: &CancellationToken,
) -> BatchOutcome {
    let mut stats = StageStats::new(&stage.name);
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.into_iter().enumerate() {
        let pos = start + i;
        // Rows past a known failure can not change the outcome.
        if token.is_cancelled() || pos > first_failure.load(Ordering::Relaxed) {
            return BatchOutcome::Cancelled;
        }
        stats.rows_in += 1;
        match process_row(stage, compiled, row, &mut stats) {
            Ok(Some(row)) => out.push(row),
            Ok(None) => {}
            Err(error) => {
                first_failure.fetch_min(pos, Ordering::Relaxed);
                return BatchOutcome::Failed { row: pos, error };
            }
        }
    }
    stats.rows_out = out.len();
    BatchOutcome::Done { rows: out, stats }
}

/// Apply the stage to one row: `Ok(None)` drops it.
///
/// The row's record starts `Pending`, tries the fast path when one is
/// compiled, falls back to the general evaluator, then to the stage's
/// handlers, until it reaches a finished state.
pub(crate) fn process_row(
    stage: &Stage,
    compiled: Option<&CompiledUdf>,
    row: Row,
    stats: &mut StageStats,
) -> Result<Option<Row>, RowError> {
    let Some(udf) = stage.kind.udf() else {
        return match &stage.kind {
            StageKind::Select(columns) => project(&row, columns).map(Some),
            _ => Ok(Some(row)),
        };
    };

    let (input, mut record): (&[Value], _) = match stage.kind.udf_input(&row) {
        Some(input) => (input, ExecutionRecord::Pending),
        None => {
            let missing = RowError::index(format!(
                "column out of range for row of width {}",
                row.width()
            ));
            (&row[..], handle_failure(stage, &row, missing, stats))
        }
    };

    loop {
        record = match record {
            ExecutionRecord::Pending => match compiled {
                Some(compiled) => match compiled.call(input) {
                    Ok(v) => {
                        stats.fast_path += 1;
                        ExecutionRecord::FastPathSucceeded(v)
                    }
                    Err(failure) => {
                        stats.fallback += 1;
                        ExecutionRecord::FastPathFailed(failure.reason)
                    }
                },
                None => {
                    stats.general_only += 1;
                    general_path(stage, udf, input, stats)
                }
            },
            ExecutionRecord::FastPathFailed(_) => general_path(stage, udf, input, stats),
            ExecutionRecord::FastPathSucceeded(v)
            | ExecutionRecord::GeneralPathSucceeded(v)
            | ExecutionRecord::Resolved(v) => return shape_output(&stage.kind, row, v),
            ExecutionRecord::Dropped => return Ok(None),
            ExecutionRecord::Fatal(e) => return Err(e),
        };
    }
}

fn general_path(
    stage: &Stage,
    udf: &Udf,
    input: &[Value],
    stats: &mut StageStats,
) -> ExecutionRecord {
    match eval::evaluate(udf, input) {
        Ok(v) => ExecutionRecord::GeneralPathSucceeded(v),
        Err(e) => handle_failure(stage, input, e, stats),
    }
}

/// Route a general-path failure through the stage's handlers.
///
/// Each handler is used at most once per row; a resolver that fails hands
/// its own error to the remaining handlers.
fn handle_failure(
    stage: &Stage,
    input: &[Value],
    error: RowError,
    stats: &mut StageStats,
) -> ExecutionRecord {
    if error.is_fatal() {
        return ExecutionRecord::Fatal(error);
    }
    stats.record_exception(error.kind);

    let mut error = error;
    let mut counted = vec![error.kind];
    let mut used = vec![false; stage.handlers.len()];
    loop {
        let Some((i, handler)) = stage.handler_for(error.kind, &used) else {
            return ExecutionRecord::Fatal(error);
        };
        used[i] = true;

        match handler {
            Handler::Ignore { .. } => {
                stats.ignored += 1;
                return ExecutionRecord::Dropped;
            }
            Handler::Resolve { udf, .. } => match eval::evaluate(udf, input) {
                Ok(v) => {
                    stats.resolved += 1;
                    return ExecutionRecord::Resolved(v);
                }
                Err(e) if e.is_fatal() => {
                    return ExecutionRecord::Fatal(e.with_context("resolver"));
                }
                Err(e) => {
                    if !counted.contains(&e.kind) {
                        counted.push(e.kind);
                        stats.record_exception(e.kind);
                    }
                    error = e.with_context("resolver");
                }
            },
        }
    }
}

fn shape_output(kind: &StageKind, mut row: Row, v: Value) -> Result<Option<Row>, RowError> {
    match kind {
        StageKind::Map(_) => Ok(Some(Row::from_value(v))),
        StageKind::Filter(_) => Ok(v.is_truthy().then_some(row)),
        StageKind::MapColumn { column, .. }
        | StageKind::WithColumn {
            column: Some(column),
            ..
        } => {
            let width = row.width();
            let slot = row.0.get_mut(*column).ok_or_else(|| {
                RowError::index(format!("column {column} out of range for row of width {width}"))
            })?;
            *slot = v;
            Ok(Some(row))
        }
        StageKind::WithColumn { column: None, .. } => {
            row.0.push(v);
            Ok(Some(row))
        }
        StageKind::Select(_) | StageKind::Unique => Ok(Some(row)),
    }
}

fn project(row: &Row, columns: &[usize]) -> Result<Row, RowError> {
    columns
        .iter()
        .map(|&c| {
            row.get(c).cloned().ok_or_else(|| {
                RowError::index(format!("column {c} out of range for row of width {}", row.width()))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Row)
}

// ---------------------------------------------------------------------------
// Unique
// ---------------------------------------------------------------------------

/// Row identity for deduplication: floats compare by bit pattern.
struct RowKey(Row);

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.width() == other.0.width() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a.bit_eq(b))
    }
}

impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.width().hash(state);
        for v in self.0.iter() {
            v.hash_bits(state);
        }
    }
}

fn unique(stage: &Stage, partitions: Vec<Partition>) -> (Vec<Partition>, StageStats) {
    let mut stats = StageStats::new(&stage.name);
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(partitions.len());
    for partition in partitions {
        stats.rows_in += partition.rows.len();
        let rows: Vec<Row> = partition
            .rows
            .into_iter()
            .filter(|row| seen.insert(RowKey(row.clone())))
            .collect();
        stats.rows_out += rows.len();
        if !rows.is_empty() {
            out.push(Partition::new(rows));
        }
    }
    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_api::{ErrorKind, Type};

    fn executor(batch_size: usize) -> Executor {
        let mut config = EngineConfig::default();
        config.executor.batch_size = batch_size;
        config.executor.workers = 2;
        Executor::new(&config)
    }

    fn source(values: Vec<Value>, partition_size: usize) -> Vec<Partition> {
        Partition::split(values.into_iter().map(Row::from_value).collect(), partition_size)
    }

    fn collect(partitions: &[Partition]) -> Vec<Value> {
        partitions
            .iter()
            .flat_map(|p| p.rows.iter().cloned().map(Row::into_value))
            .collect()
    }

    fn map(src: &str) -> Stage {
        Stage::new(StageKind::Map(Udf::parse(src).unwrap()))
    }

    #[test]
    fn split_keeps_order() {
        let parts = source((0..10).map(Value::Int).collect(), 4);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].rows.len(), 2);
        assert_eq!(collect(&parts), (0..10).map(Value::Int).collect::<Vec<_>>());
        assert!(Partition::split(Vec::new(), 4).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn order_survives_mixed_paths() {
        // Every third row is an int and misses the float fast path.
        let values: Vec<Value> = (0..100)
            .map(|i| if i % 3 == 0 { Value::Int(i) } else { Value::Float(i as f64) })
            .collect();
        let mut config = EngineConfig::default();
        config.executor.batch_size = 7;
        config.inference.normal_case_threshold = 0.6;
        let exec = Executor::new(&config);

        let (out, stats) = exec
            .execute(source(values.clone(), 30), &[map("lambda x: x * 2")])
            .await
            .unwrap();
        let expected: Vec<Value> = values
            .iter()
            .map(|v| match v {
                Value::Int(i) => Value::Int(i * 2),
                Value::Float(f) => Value::Float(f * 2.0),
                other => other.clone(),
            })
            .collect();
        assert_eq!(collect(&out), expected);

        let s = &stats.stages[0];
        assert_eq!(s.rows_in, 100);
        assert_eq!(s.fast_path + s.fallback + s.general_only, 100);
        assert!(s.fast_path > 0);
        assert!(s.fallback > 0);
    }

    #[tokio::test]
    async fn earliest_failing_row_is_reported() {
        let values = vec![
            Value::Float(1.0),
            Value::Float(-1.0),
            Value::Float(2.0),
            Value::Float(-2.0),
        ];
        let err = executor(1)
            .execute(source(values, 2), &[map("lambda x: math.log(x)")])
            .await
            .unwrap_err();
        match err {
            EngineError::Stage { row, index, source, .. } => {
                assert_eq!(row, 1);
                assert_eq!(index, 0);
                assert_eq!(source.kind, ErrorKind::Domain);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn ignore_and_resolve_handlers() {
        let values = vec![Value::Int(2), Value::Int(0), Value::Int(4)];

        let mut ignoring = map("lambda x: 8 // x");
        ignoring.handlers.push(Handler::Ignore {
            kind: ErrorKind::ZeroDivision,
        });
        let (out, stats) = executor(2)
            .execute(source(values.clone(), 10), &[ignoring])
            .await
            .unwrap();
        assert_eq!(collect(&out), vec![Value::Int(4), Value::Int(2)]);
        assert_eq!(stats.stages[0].ignored, 1);
        assert_eq!(stats.stages[0].exceptions[&ErrorKind::ZeroDivision], 1);

        let mut resolving = map("lambda x: 8 // x");
        resolving.handlers.push(Handler::Resolve {
            kind: ErrorKind::ZeroDivision,
            udf: Udf::parse("lambda x: -1").unwrap(),
        });
        let (out, stats) = executor(2)
            .execute(source(values, 10), &[resolving])
            .await
            .unwrap();
        assert_eq!(collect(&out), vec![Value::Int(4), Value::Int(-1), Value::Int(2)]);
        assert_eq!(stats.stages[0].resolved, 1);
    }

    #[tokio::test]
    async fn failing_resolver_falls_to_next_handler() {
        let mut stage = map("lambda x: 1 // x");
        stage.handlers.push(Handler::Resolve {
            kind: ErrorKind::ZeroDivision,
            udf: Udf::parse("lambda x: math.log(x - 1)").unwrap(),
        });
        stage.handlers.push(Handler::Ignore {
            kind: ErrorKind::Domain,
        });
        let (out, stats) = executor(4)
            .execute(source(vec![Value::Int(1), Value::Int(0)], 10), &[stage])
            .await
            .unwrap();
        assert_eq!(collect(&out), vec![Value::Int(1)]);
        let s = &stats.stages[0];
        assert_eq!((s.resolved, s.ignored), (0, 1));
        assert_eq!(s.exceptions[&ErrorKind::ZeroDivision], 1);
        assert_eq!(s.exceptions[&ErrorKind::Domain], 1);
    }

    #[tokio::test]
    async fn fatal_errors_ignore_handlers() {
        let mut stage = map("lambda x: x + 'a'");
        stage.handlers.push(Handler::Ignore {
            kind: ErrorKind::Domain,
        });
        let err = executor(4)
            .execute(source(vec![Value::Int(1)], 10), &[stage])
            .await
            .unwrap_err();
        assert_eq!(err.row_error().map(|e| e.kind), Some(ErrorKind::Type));
    }

    #[tokio::test]
    async fn schemas_are_reinferred_between_stages() {
        let stages = [map("lambda x: (x, x * 0.5)"), map("lambda a, b: a + b")];
        let (out, stats) = executor(8)
            .execute(source(vec![Value::Int(2), Value::Int(4)], 10), &stages)
            .await
            .unwrap();
        assert_eq!(collect(&out), vec![Value::Float(3.0), Value::Float(6.0)]);
        assert_eq!(out[0].schema, Schema::row([Type::Float]));
        assert_eq!(stats.stages[1].fast_path, 2);
    }

    #[tokio::test]
    async fn filter_column_stages_and_unique() {
        let values = vec![
            Value::from((1, 2.0)),
            Value::from((2, f64::NAN)),
            Value::from((1, 2.0)),
            Value::from((2, f64::NAN)),
            Value::from((3, 4.0)),
        ];
        let stages = [
            Stage::new(StageKind::Unique),
            Stage::new(StageKind::Filter(Udf::parse("lambda a, b: a < 3").unwrap())),
            Stage::new(StageKind::MapColumn {
                column: 0,
                udf: Udf::parse("lambda a: a * 10").unwrap(),
            }),
            Stage::new(StageKind::WithColumn {
                column: None,
                udf: Udf::parse("lambda a, b: a + 1").unwrap(),
            }),
            Stage::new(StageKind::Select(vec![2, 0])),
        ];
        let (out, stats) = executor(2).execute(source(values, 2), &stages).await.unwrap();
        assert_eq!(
            collect(&out),
            vec![Value::from((11, 10)), Value::from((21, 20))]
        );
        assert_eq!(stats.stages[0].rows_out, 3);
        assert_eq!(stats.stages[1].rows_out, 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_execution() {
        let token = CancellationToken::new();
        token.cancel();
        let exec = executor(4).with_token(token);
        let err = exec
            .execute(source(vec![Value::Int(1)], 10), &[map("lambda x: x")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }

    #[test]
    fn record_transitions() {
        let stage = map("lambda x: math.sqrt(x)");
        let udf = stage.kind.udf().unwrap().clone();
        let compiled =
            crate::specialize::specialize(&udf, &Schema::row([Type::Float])).unwrap();
        let mut stats = StageStats::default();
        let row = |v: Value| Row(vec![v]);

        let ok = process_row(&stage, Some(&compiled), row(Value::Float(4.0)), &mut stats);
        assert_eq!(ok, Ok(Some(row(Value::Float(2.0)))));
        assert_eq!(stats.fast_path, 1);

        let fell_back = process_row(&stage, Some(&compiled), row(Value::Int(9)), &mut stats);
        assert_eq!(fell_back, Ok(Some(row(Value::Float(3.0)))));
        assert_eq!(stats.fallback, 1);

        let failed = process_row(&stage, None, row(Value::Float(-1.0)), &mut stats);
        assert_eq!(failed.unwrap_err().kind, ErrorKind::Domain);
        assert_eq!(stats.general_only, 1);

        assert!(ExecutionRecord::Dropped.is_finished());
        assert!(!ExecutionRecord::Pending.is_finished());
        assert!(!ExecutionRecord::FastPathFailed(FailureReason::Domain).is_finished());
    }
}
