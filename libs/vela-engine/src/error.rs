use vela_api::RowError;

use crate::udf::UdfError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("udf error: {0}")]
    Udf(#[from] UdfError),

    /// A row failed and no handler on the stage took it.
    #[error("stage {index} '{stage}' failed at row {row}: {source}")]
    Stage {
        stage: String,
        index: usize,
        row: usize,
        source: RowError,
    },

    #[error("worker error: {0}")]
    Worker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Stage`, context goes into the row error; `Config` and `Worker`
    /// get it prepended.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Stage {
                stage,
                index,
                row,
                source,
            } => EngineError::Stage {
                stage,
                index,
                row,
                source: source.with_context(ctx),
            },
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::Worker(msg) => EngineError::Worker(format!("{ctx}: {msg}")),
            other => other,
        }
    }

    /// Row error behind a stage failure.
    pub fn row_error(&self) -> Option<&RowError> {
        match self {
            EngineError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_api::ErrorKind;

    #[test]
    fn stage_error_names_stage_and_row() {
        let err = EngineError::Stage {
            stage: "map".into(),
            index: 1,
            row: 7,
            source: RowError::domain("math domain error"),
        };
        assert_eq!(
            err.to_string(),
            "stage 1 'map' failed at row 7: domain: math domain error"
        );
        assert_eq!(err.row_error().map(|e| e.kind), Some(ErrorKind::Domain));
    }

    #[test]
    fn config_context_is_prepended() {
        let err = EngineError::Config("bad".into()).with_context("job.toml");
        assert_eq!(err.to_string(), "config error: job.toml: bad");
    }
}
