//! Entry point: [`Context`] creates datasets, [`DataSet`] builds a lazy
//! pipeline and runs it on an action.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use vela_api::{ErrorKind, Row, Schema, Value};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::{Executor, Partition};
use crate::stage::{Handler, Stage, StageKind};
use crate::stats::ExecutionStats;
use crate::udf::{Udf, UdfError};

/// Anything a stage accepts as its function.
pub trait IntoUdf {
    fn into_udf(self) -> Result<Udf, UdfError>;
}

impl IntoUdf for Udf {
    fn into_udf(self) -> Result<Udf, UdfError> {
        Ok(self)
    }
}

impl IntoUdf for &Udf {
    fn into_udf(self) -> Result<Udf, UdfError> {
        Ok(self.clone())
    }
}

impl IntoUdf for &str {
    fn into_udf(self) -> Result<Udf, UdfError> {
        Udf::parse(self)
    }
}

impl IntoUdf for String {
    fn into_udf(self) -> Result<Udf, UdfError> {
        Udf::parse(&self)
    }
}

struct Inner {
    config: EngineConfig,
    runtime: Runtime,
    token: CancellationToken,
}

/// Owns the worker runtime. Cheap to clone.
///
/// Actions block on the runtime, so they must not be called from inside
/// another tokio runtime.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let workers = config.executor.workers;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .thread_name("vela-worker")
            .build()?;
        tracing::debug!(workers, "context started");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                token: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Stop running and future executions on this context.
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// Dataset over `rows`. A tuple becomes a multi-column row.
    pub fn parallelize<V: Into<Value>>(&self, rows: impl IntoIterator<Item = V>) -> DataSet {
        DataSet {
            ctx: self.clone(),
            source: Arc::new(rows.into_iter().map(|v| Row::from_value(v.into())).collect()),
            columns: None,
            stages: Vec::new(),
            last_input: None,
            stats: Arc::new(Mutex::new(None)),
        }
    }

    /// Dataset with named columns.
    pub fn parallelize_with_columns<V, S>(
        &self,
        rows: impl IntoIterator<Item = V>,
        columns: impl IntoIterator<Item = S>,
    ) -> Result<DataSet, EngineError>
    where
        V: Into<Value>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(EngineError::Config(format!("duplicate column '{name}'")));
            }
        }
        let mut ds = self.parallelize(rows);
        ds.columns = Some(columns);
        Ok(ds)
    }
}

/// Lazy pipeline over a source. Builders return a new dataset; nothing runs
/// until an action.
#[derive(Clone)]
pub struct DataSet {
    ctx: Context,
    source: Arc<Vec<Row>>,
    columns: Option<Vec<String>>,
    stages: Vec<Stage>,
    /// Column names the last UDF stage's function sees, for binding handlers.
    last_input: Option<Vec<String>>,
    stats: Arc<Mutex<Option<ExecutionStats>>>,
}

impl DataSet {
    // ---- Builders ----

    pub fn map(&self, udf: impl IntoUdf) -> Result<DataSet, EngineError> {
        let udf = udf.into_udf()?.bind_columns(self.columns.as_deref())?;
        let input = self.columns.clone();
        Ok(self.push(Stage::new(StageKind::Map(udf)), None, input))
    }

    pub fn filter(&self, udf: impl IntoUdf) -> Result<DataSet, EngineError> {
        let udf = udf.into_udf()?.bind_columns(self.columns.as_deref())?;
        let columns = self.columns.clone();
        Ok(self.push(Stage::new(StageKind::Filter(udf)), columns.clone(), columns))
    }

    /// Apply a one-parameter function to column `name`, replacing it.
    pub fn map_column(&self, name: &str, udf: impl IntoUdf) -> Result<DataSet, EngineError> {
        let column = self.position(name, "map_column")?;
        let udf = udf.into_udf()?.bind_columns(None)?;
        if udf.arity() != 1 {
            return Err(EngineError::Config(format!(
                "map_column '{name}': function takes {} parameters, expected 1",
                udf.arity()
            )));
        }
        let columns = self.columns.clone();
        Ok(self.push(Stage::new(StageKind::MapColumn { column, udf }), columns, None))
    }

    /// Set column `name` from a function of the whole row, appending it if new.
    pub fn with_column(&self, name: &str, udf: impl IntoUdf) -> Result<DataSet, EngineError> {
        let names = self.require_columns("with_column")?;
        let column = names.iter().position(|c| c == name);
        let mut after = names.to_vec();
        if column.is_none() {
            after.push(name.to_string());
        }
        let udf = udf.into_udf()?.bind_columns(Some(names))?;
        let input = self.columns.clone();
        Ok(self.push(
            Stage::new(StageKind::WithColumn { column, udf }),
            Some(after),
            input,
        ))
    }

    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<DataSet, EngineError> {
        let positions = names
            .iter()
            .map(|n| self.position(n.as_ref(), "select_columns"))
            .collect::<Result<Vec<_>, _>>()?;
        let after = names.iter().map(|n| n.as_ref().to_string()).collect();
        Ok(self.push(Stage::new(StageKind::Select(positions)), Some(after), None))
    }

    pub fn rename_column(&self, from: &str, to: &str) -> Result<DataSet, EngineError> {
        let column = self.position(from, "rename_column")?;
        let mut ds = self.clone();
        if let Some(names) = ds.columns.as_mut() {
            if names.iter().enumerate().any(|(i, n)| i != column && n == to) {
                return Err(EngineError::Config(format!(
                    "rename_column: column '{to}' already exists"
                )));
            }
            names[column] = to.to_string();
        }
        ds.stats = Arc::new(Mutex::new(None));
        Ok(ds)
    }

    pub fn unique(&self) -> DataSet {
        let columns = self.columns.clone();
        self.push(Stage::new(StageKind::Unique), columns, None)
    }

    /// Re-run rows that fail with `kind` in the previous stage through `udf`.
    pub fn resolve(&self, kind: ErrorKind, udf: impl IntoUdf) -> Result<DataSet, EngineError> {
        self.check_handler(kind, "resolve")?;
        let udf = udf.into_udf()?.bind_columns(self.last_input.as_deref())?;
        Ok(self.with_handler(Handler::Resolve { kind, udf }))
    }

    /// Drop rows that fail with `kind` in the previous stage.
    pub fn ignore(&self, kind: ErrorKind) -> Result<DataSet, EngineError> {
        self.check_handler(kind, "ignore")?;
        Ok(self.with_handler(Handler::Ignore { kind }))
    }

    // ---- Actions ----

    /// Run the pipeline and return every output value in order.
    pub fn collect(&self) -> Result<Vec<Value>, EngineError> {
        Ok(self.run()?.into_iter().map(Row::into_value).collect())
    }

    pub fn take(&self, n: usize) -> Result<Vec<Value>, EngineError> {
        let mut rows = self.run()?;
        rows.truncate(n);
        Ok(rows.into_iter().map(Row::into_value).collect())
    }

    /// Render the first `n` rows as a text table.
    pub fn show(&self, n: usize) -> Result<String, EngineError> {
        let mut rows = self.run()?;
        rows.truncate(n);
        Ok(render_table(self.columns.as_deref(), &rows))
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Schema inferred over the result rows.
    pub fn types(&self) -> Result<Schema, EngineError> {
        let rows = self.run()?;
        Ok(Executor::new(self.ctx.config()).infer(&rows))
    }

    /// Counters from the last action on this dataset.
    pub fn stats(&self) -> Option<ExecutionStats> {
        self.stats_slot().clone()
    }

    /// Failures per stage and kind from the last action.
    pub fn exception_counts(&self) -> Option<BTreeMap<String, BTreeMap<ErrorKind, usize>>> {
        self.stats_slot().as_ref().map(ExecutionStats::exception_counts)
    }

    /// Run the pipeline, returning the output rows in order.
    pub fn run(&self) -> Result<Vec<Row>, EngineError> {
        let config = self.ctx.config();
        let executor = Executor::new(config).with_token(self.ctx.inner.token.clone());
        let partitions = Partition::split(self.source.as_ref().clone(), config.executor.partition_size);
        tracing::info!(
            rows = self.source.len(),
            partitions = partitions.len(),
            stages = self.stages.len(),
            "executing pipeline"
        );

        let (partitions, stats) = self
            .ctx
            .inner
            .runtime
            .block_on(executor.execute(partitions, &self.stages))?;
        *self.stats_slot() = Some(stats);
        Ok(partitions.into_iter().flat_map(|p| p.rows).collect())
    }

    // ---- Internals ----

    fn push(
        &self,
        stage: Stage,
        columns: Option<Vec<String>>,
        last_input: Option<Vec<String>>,
    ) -> DataSet {
        let mut stages = self.stages.clone();
        stages.push(stage);
        DataSet {
            ctx: self.ctx.clone(),
            source: self.source.clone(),
            columns,
            stages,
            last_input,
            stats: Arc::new(Mutex::new(None)),
        }
    }

    fn require_columns(&self, op: &str) -> Result<&[String], EngineError> {
        self.columns
            .as_deref()
            .ok_or_else(|| EngineError::Config(format!("{op}: dataset has no column names")))
    }

    fn position(&self, name: &str, op: &str) -> Result<usize, EngineError> {
        self.require_columns(op)?
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EngineError::Config(format!("{op}: unknown column '{name}'")))
    }

    fn check_handler(&self, kind: ErrorKind, op: &str) -> Result<(), EngineError> {
        if kind.is_fatal() {
            return Err(EngineError::Config(format!(
                "{op}: {kind} errors can not be handled"
            )));
        }
        match self.stages.last() {
            Some(stage) if stage.kind.udf().is_some() => Ok(()),
            _ => Err(EngineError::Config(format!(
                "{op}: previous stage has no function"
            ))),
        }
    }

    fn with_handler(&self, handler: Handler) -> DataSet {
        let mut ds = self.clone();
        if let Some(stage) = ds.stages.last_mut() {
            stage.handlers.push(handler);
        }
        ds.stats = Arc::new(Mutex::new(None));
        ds
    }

    fn stats_slot(&self) -> MutexGuard<'_, Option<ExecutionStats>> {
        self.stats.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("stats lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self.stages.iter().map(Stage::to_string).collect();
        f.debug_struct("DataSet")
            .field("rows", &self.source.len())
            .field("columns", &self.columns)
            .field("stages", &stages)
            .finish()
    }
}

fn render_table(columns: Option<&[String]>, rows: &[Row]) -> String {
    let width = columns
        .map(<[String]>::len)
        .or_else(|| rows.iter().map(Row::width).max())
        .unwrap_or(0);
    let header: Vec<String> = match columns {
        Some(names) => names.to_vec(),
        None => (0..width).map(|i| format!("_{i}")).collect(),
    };
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.iter().map(Value::repr).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(String::len).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(cell.len()),
                None => widths.push(cell.len()),
            }
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, items: &[String]| {
        out.push('|');
        for (i, &w) in widths.iter().enumerate() {
            let item = items.get(i).map_or("", String::as_str);
            let _ = write!(out, " {item:<w$} |");
        }
        out.push('\n');
    };
    line(&mut out, &header);
    out.push('|');
    for w in &widths {
        out.push_str(&"-".repeat(w + 2));
        out.push('|');
    }
    out.push('\n');
    for row in &cells {
        line(&mut out, row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        let mut config = EngineConfig::default();
        config.executor.workers = 2;
        config.executor.partition_size = 3;
        config.executor.batch_size = 2;
        Context::new(config).unwrap()
    }

    #[test]
    fn debug_lists_stages_without_running() {
        let ds = ctx()
            .parallelize_with_columns([(1, 2.0)], ["id", "x"])
            .unwrap()
            .map_column("x", "lambda v: v * 2")
            .unwrap();
        let out = format!("{ds:?}");
        assert!(out.starts_with("DataSet { rows: 1, columns: Some([\"id\", \"x\"])"), "{out}");
        assert!(out.contains("map_column"), "{out}");
        assert!(ds.stats().is_none());
    }

    #[test]
    fn map_collect() {
        let ds = ctx()
            .parallelize([1.0, 4.0, 9.0])
            .map("lambda x: math.sqrt(x)")
            .unwrap();
        assert_eq!(
            ds.collect().unwrap(),
            vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]
        );
        assert_eq!(ds.take(1).unwrap(), vec![Value::Float(1.0)]);
        assert_eq!(ds.types().unwrap(), Schema::row([vela_api::Type::Float]));
    }

    #[test]
    fn builders_are_lazy_and_independent() {
        let base = ctx().parallelize([1, 2, 3]);
        let doubled = base.map("lambda x: x * 2").unwrap();
        assert_eq!(base.collect().unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(
            doubled.collect().unwrap(),
            vec![Value::Int(2), Value::Int(4), Value::Int(6)]
        );
    }

    #[test]
    fn column_operators() {
        let ds = ctx()
            .parallelize_with_columns([(1, 2.5), (2, 3.5)], ["id", "price"])
            .unwrap()
            .map_column("price", "lambda p: p * 2")
            .unwrap()
            .with_column("total", "lambda r: r['id'] + r['price']")
            .unwrap()
            .rename_column("id", "key")
            .unwrap()
            .select_columns(&["total", "key"])
            .unwrap();
        assert_eq!(ds.columns().unwrap(), ["total", "key"]);
        assert_eq!(
            ds.collect().unwrap(),
            vec![Value::from((6.0, 1)), Value::from((9.0, 2))]
        );
    }

    #[test]
    fn column_operators_need_names() {
        let ds = ctx().parallelize([(1, 2)]);
        assert!(matches!(
            ds.select_columns(&["a"]),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            ds.map("lambda r: r['a']"),
            Err(EngineError::Udf(UdfError::NoColumns(_)))
        ));
        let named = ctx().parallelize_with_columns([(1, 2)], ["a", "b"]).unwrap();
        assert!(named.map_column("c", "lambda x: x").is_err());
        assert!(named.rename_column("a", "b").is_err());
        assert!(ctx().parallelize_with_columns([1], ["a", "a"]).is_err());
    }

    #[test]
    fn handlers_attach_to_udf_stages() {
        let ds = ctx().parallelize([1, 0, 2]);
        assert!(ds.ignore(ErrorKind::ZeroDivision).is_err());
        assert!(ds.unique().ignore(ErrorKind::ZeroDivision).is_err());

        let mapped = ds.map("lambda x: 10 // x").unwrap();
        assert!(mapped.ignore(ErrorKind::Type).is_err());

        let resolved = mapped.resolve(ErrorKind::ZeroDivision, "lambda x: 0").unwrap();
        assert_eq!(
            resolved.collect().unwrap(),
            vec![Value::Int(10), Value::Int(0), Value::Int(5)]
        );
        let counts = resolved.exception_counts().unwrap();
        assert_eq!(counts["map(lambda x: 10 // x)"][&ErrorKind::ZeroDivision], 1);

        let err = mapped.collect().unwrap_err();
        assert!(err.to_string().contains("failed at row 1"), "{err}");
    }

    #[test]
    fn filter_and_unique() {
        let ds = ctx()
            .parallelize([3, 1, 3, 2, 1, 4])
            .unique()
            .filter("lambda x: x % 2 == 1")
            .unwrap();
        assert_eq!(ds.collect().unwrap(), vec![Value::Int(3), Value::Int(1)]);
        let stats = ds.stats().unwrap();
        assert_eq!(stats.stages[0].rows_out, 4);
    }

    #[test]
    fn show_renders_a_table() {
        let table = ctx()
            .parallelize_with_columns([(1, "a"), (22, "b")], ["n", "s"])
            .unwrap()
            .show(5)
            .unwrap();
        assert_eq!(
            table,
            "| n  | s   |\n|----|-----|\n| 1  | 'a' |\n| 22 | 'b' |\n"
        );

        let table = ctx().parallelize([1.5]).show(1).unwrap();
        assert_eq!(table, "| _0  |\n|-----|\n| 1.5 |\n");
    }

    #[test]
    fn cancelled_context_fails_actions() {
        let ctx = ctx();
        ctx.cancel();
        let err = ctx.parallelize([1]).map("lambda x: x").unwrap().collect().unwrap_err();
        assert!(matches!(err, EngineError::Worker(_)));
    }
}
