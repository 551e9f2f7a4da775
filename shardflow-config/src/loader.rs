//! Configuration loading with environment overrides
//!
//! A YAML file (or the defaults) is read first, then every `<PREFIX>_*`
//! variable that is set replaces the matching field, then each domain is
//! validated.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::domains::ShardflowConfig;
use crate::error::{ConfigError, ConfigResult};

pub struct ConfigLoader {
    prefix: String,
}

impl ConfigLoader {
    /// A loader reading `SHARDFLOW_*` variables
    pub fn new() -> Self {
        Self::with_prefix("SHARDFLOW")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ShardflowConfig> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ShardflowConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        self.finish(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env(&self) -> ConfigResult<ShardflowConfig> {
        self.finish(ShardflowConfig::default())
    }

    /// Load from `config_path` when given, otherwise from the environment
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ShardflowConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn finish(&self, mut config: ShardflowConfig) -> ConfigResult<ShardflowConfig> {
        self.apply_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut ShardflowConfig) -> ConfigResult<()> {
        let execution = &mut config.execution;
        if let Some(dir) = self.var::<PathBuf>("WORK_DIR")? {
            execution.work_dir = dir;
        }
        if let Some(attempts) = self.var("RETRY_MAX_ATTEMPTS")? {
            execution.retry.max_attempts = attempts;
        }
        if let Some(millis) = self.var("HEARTBEAT_INTERVAL_MS")? {
            execution.heartbeat_interval = Duration::from_millis(millis);
        }
        if let Some(address) = self.var("STATS_BIND_ADDRESS")? {
            execution.stats_bind_address = address;
        }

        if let Some(rows) = self.var("SORT_BUFFER_ROWS")? {
            config.sort.buffer_rows = rows;
        }
        if let Some(root) = self.var::<PathBuf>("SORT_TMP_ROOT")? {
            config.sort.tmp_root = Some(root);
        }

        if let Some(level) = self.var("LOG_LEVEL")? {
            config.logging.level = level;
        }
        if let Some(format) = self.var("LOG_FORMAT")? {
            config.logging.format = format;
        }
        Ok(())
    }

    /// Parse `<PREFIX>_<name>` if it is set
    fn var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let variable = format!("{}_{}", self.prefix, name);
        let Ok(value) = std::env::var(&variable) else {
            return Ok(None);
        };
        match value.parse() {
            Ok(parsed) => {
                debug!(variable = %variable, "Applying environment override");
                Ok(Some(parsed))
            }
            Err(e) => Err(ConfigError::Env {
                variable,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
