//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An override variable is set but does not parse
    #[error("Invalid value {value:?} in {variable}: {reason}")]
    Env {
        variable: String,
        value: String,
        reason: String,
    },

    #[error("Invalid {domain} configuration: {message}")]
    Domain { domain: String, message: String },
}
