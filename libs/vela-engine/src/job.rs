use std::path::Path;

use serde::Deserialize;
use vela_api::{ErrorKind, Value};

use crate::config::{ConfigParser, EngineConfig, TomlParser};
use crate::context::{Context, DataSet};
use crate::error::EngineError;

/// A pipeline described in a file: engine settings, literal source rows and
/// the stages to apply.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    pub source: SourceConfig,

    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub rows: Vec<Value>,

    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

/// One pipeline step. UDFs are lambda text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StageConfig {
    Map { udf: String },
    Filter { udf: String },
    MapColumn { column: String, udf: String },
    WithColumn { column: String, udf: String },
    SelectColumns { columns: Vec<String> },
    RenameColumn { from: String, to: String },
    Unique,
    Resolve { kind: ErrorKind, udf: String },
    Ignore { kind: ErrorKind },
}

impl JobConfig {
    /// Load a TOML job file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::load_with(path, &[&TomlParser])
    }

    /// Load a job file, picking the parser by file extension.
    pub fn load_with(
        path: impl AsRef<Path>,
        parsers: &[&dyn ConfigParser],
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let display = path.display();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let parser = parsers
            .iter()
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| {
                EngineError::Config(format!("{display}: no parser for extension '{ext}'"))
            })?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{display}: {e}")))?;
        let job = parser.parse(&content).map_err(|e| e.with_context(&display))?;
        job.engine.validate().map_err(|e| e.with_context(&display))?;
        Ok(job)
    }

    /// Parse a job from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let job = TomlParser.parse(toml_str)?;
        job.engine.validate()?;
        Ok(job)
    }

    /// Context configured with this job's engine settings.
    pub fn context(&self) -> Result<Context, EngineError> {
        Context::new(self.engine.clone())
    }

    /// Turn the job into a lazy dataset on `ctx`.
    pub fn build(&self, ctx: &Context) -> Result<DataSet, EngineError> {
        let mut ds = match &self.source.columns {
            Some(columns) => {
                ctx.parallelize_with_columns(self.source.rows.iter().cloned(), columns.iter())?
            }
            None => ctx.parallelize(self.source.rows.iter().cloned()),
        };
        for (i, stage) in self.stages.iter().enumerate() {
            ds = apply(ds, stage).map_err(|e| e.with_context(format!("stage {i}")))?;
        }
        Ok(ds)
    }
}

fn apply(ds: DataSet, stage: &StageConfig) -> Result<DataSet, EngineError> {
    match stage {
        StageConfig::Map { udf } => ds.map(udf.as_str()),
        StageConfig::Filter { udf } => ds.filter(udf.as_str()),
        StageConfig::MapColumn { column, udf } => ds.map_column(column, udf.as_str()),
        StageConfig::WithColumn { column, udf } => ds.with_column(column, udf.as_str()),
        StageConfig::SelectColumns { columns } => ds.select_columns(columns),
        StageConfig::RenameColumn { from, to } => ds.rename_column(from, to),
        StageConfig::Unique => Ok(ds.unique()),
        StageConfig::Resolve { kind, udf } => ds.resolve(*kind, udf.as_str()),
        StageConfig::Ignore { kind } => ds.ignore(*kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
        [engine.executor]
        batch_size = 4

        [source]
        rows = [[1, 2.0], [3, 0.0]]
        columns = ["a", "b"]

        [[stage]]
        op = "with_column"
        column = "c"
        udf = "lambda r: r['a'] / r['b']"

        [[stage]]
        op = "ignore"
        kind = "zero_division"

        [[stage]]
        op = "select_columns"
        columns = ["c"]
    "#;

    #[test]
    fn parses_stages_in_order() {
        let job = JobConfig::parse(JOB).unwrap();
        assert_eq!(job.engine.executor.batch_size, 4);
        assert_eq!(job.source.rows.len(), 2);
        assert_eq!(job.stages.len(), 3);
        assert_eq!(
            job.stages[1],
            StageConfig::Ignore {
                kind: ErrorKind::ZeroDivision
            }
        );
    }

    #[test]
    fn builds_and_runs() {
        let job = JobConfig::parse(JOB).unwrap();
        let ctx = job.context().unwrap();
        let ds = job.build(&ctx).unwrap();
        assert_eq!(ds.columns(), Some(&["c".to_string()][..]));
        assert_eq!(ds.collect().unwrap(), vec![Value::Float(0.5)]);
    }

    #[test]
    fn bad_lambda_names_the_stage() {
        let job = JobConfig::parse(
            r#"
            [source]
            rows = [1]

            [[stage]]
            op = "map"
            udf = "lambda x: x +"
            "#,
        )
        .unwrap();
        let ctx = job.context().unwrap();
        let err = job.build(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::Udf(_)), "{err}");
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = JobConfig::parse("[source]\nrows = []\n[[stage]]\nop = \"explode\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
