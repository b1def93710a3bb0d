//! Typed dataset pipelines with speculative fast paths.
//!
//! A [`Context`] turns rows into a lazy [`DataSet`]; each stage applies a
//! [`Udf`]. At run time every partition's schema is inferred, the UDF is
//! specialized for it where possible, and rows the fast path can not handle
//! fall back to the general evaluator. Both paths share [`math`].

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod executor;
pub mod infer;
pub mod job;
pub mod math;
pub mod specialize;
pub mod stage;
pub mod stats;
pub mod udf;

pub use config::{ConfigParser, EngineConfig, TomlParser};
pub use context::{Context, DataSet, IntoUdf};
pub use error::EngineError;
pub use executor::{ExecutionRecord, Executor, Partition};
pub use job::{JobConfig, StageConfig};
pub use stats::{ExecutionStats, StageStats};
pub use udf::{Udf, UdfError};
