use vela_engine::config::ConfigParser;
use vela_engine::error::EngineError;
use vela_engine::job::JobConfig;

/// HCL job files. Stages are repeated `stage { ... }` blocks.
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<JobConfig, EngineError> {
        let mut value: serde_json::Value =
            hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        // A lone block decodes as an object rather than a list of one.
        if let Some(stage) = value.get_mut("stage") {
            if stage.is_object() {
                *stage = serde_json::Value::Array(vec![stage.take()]);
            }
        }
        serde_json::from_value(value).map_err(|e| EngineError::Config(e.to_string()))
    }
}
