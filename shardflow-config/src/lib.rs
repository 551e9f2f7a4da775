//! Domain-driven configuration for Shardflow
//!
//! Configuration is split into execution, sort and logging domains, each
//! defaulted field by field, overridable through `SHARDFLOW_*` environment
//! variables and validated before use.

pub mod error;
pub mod loader;
pub mod validation;

pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

pub use domains::{
    execution::{ExecutionConfig, RetryConfig},
    logging::{LogFormat, LogLevel, LoggingConfig},
    sort::SortConfig,
    ShardflowConfig,
};
