use serde::Deserialize;

use crate::error::EngineError;
use crate::job::JobConfig;

/// Engine tuning. Every field has a default, so an empty table is valid.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub inference: InferenceConfig,

    #[serde(default)]
    pub fast_path: FastPathConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutorConfig {
    /// Runtime worker threads, also the blocking pool size.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Rows per partition created by `parallelize`.
    #[serde(default = "default_partition_size")]
    pub partition_size: usize,

    /// Rows per task.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(4, |n| n.get())
}

fn default_partition_size() -> usize {
    4096
}

fn default_batch_size() -> usize {
    256
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            partition_size: default_partition_size(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InferenceConfig {
    /// Leading rows of a partition looked at.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Share of the sample a type needs to become the normal case, in (0, 1].
    #[serde(default = "default_threshold")]
    pub normal_case_threshold: f64,
}

fn default_sample_size() -> usize {
    100
}

fn default_threshold() -> f64 {
    1.0
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            normal_case_threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FastPathConfig {
    /// When off, every row goes to the general evaluator.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for FastPathConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

impl EngineConfig {
    /// Parse engine settings from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            ("executor.workers", self.executor.workers),
            ("executor.partition_size", self.executor.partition_size),
            ("executor.batch_size", self.executor.batch_size),
            ("inference.sample_size", self.inference.sample_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        let t = self.inference.normal_case_threshold;
        if !(t > 0.0 && t <= 1.0) {
            return Err(EngineError::Config(format!(
                "inference.normal_case_threshold must be in (0, 1], got {t}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job file parsers
// ---------------------------------------------------------------------------

/// A job file format, chosen by file extension.
pub trait ConfigParser: Send + Sync {
    fn extensions(&self) -> &[&str];

    fn parse(&self, content: &str) -> Result<JobConfig, EngineError>;
}

/// Built-in TOML format.
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<JobConfig, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = EngineConfig::parse("").unwrap();
        assert_eq!(config.executor.partition_size, 4096);
        assert_eq!(config.executor.batch_size, 256);
        assert!(config.executor.workers >= 1);
        assert_eq!(config.inference.sample_size, 100);
        assert_eq!(config.inference.normal_case_threshold, 1.0);
        assert!(config.fast_path.enabled);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = EngineConfig::parse(
            r#"
            [executor]
            batch_size = 8

            [fast_path]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.executor.batch_size, 8);
        assert_eq!(config.executor.partition_size, 4096);
        assert!(!config.fast_path.enabled);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let err = EngineConfig::parse("[executor]\nbatch_size = 0").unwrap_err();
        assert!(err.to_string().contains("executor.batch_size"));

        let err = EngineConfig::parse("[inference]\nnormal_case_threshold = 1.5").unwrap_err();
        assert!(err.to_string().contains("normal_case_threshold"));

        assert!(EngineConfig::parse("[inference]\nnormal_case_threshold = 0.0").is_err());
    }

    #[test]
    fn unknown_types_are_config_errors() {
        let err = EngineConfig::parse("[executor]\nworkers = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
