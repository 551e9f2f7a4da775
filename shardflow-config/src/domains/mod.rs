//! Domain-specific configuration modules

pub mod execution;
pub mod logging;
pub mod sort;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Shardflow configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ShardflowConfig {
    /// Pipeline executor configuration
    pub execution: execution::ExecutionConfig,

    /// External sort configuration
    pub sort: sort::SortConfig,

    pub logging: logging::LoggingConfig,
}

impl ShardflowConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.execution.validate()?;
        self.sort.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ShardflowConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
