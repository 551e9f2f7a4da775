//! Pipeline executor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_socket_address, Validatable};

/// Pipeline executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Directory holding the task's scripts; also their working directory
    pub work_dir: PathBuf,

    /// Capacity of each in-process pipe between adjacent stages
    pub pipe_buffer_bytes: usize,

    /// Re-run policy for subprocess stages that failed before reading input
    pub retry: RetryConfig,

    /// How often a status snapshot is reported while a task runs
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// How long to wait for stages to wind down after a failure or interrupt
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Timeout for dialing a shard channel on an agent
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Where the stats listener binds; subprocesses report here
    pub stats_bind_address: String,
}

/// Subprocess retry settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,

    /// Wait after the first failed start
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Growth of the wait per further failure; 1.0 keeps it fixed
    pub multiplier: f64,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Spread waits by up to 20%
    pub jitter: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            pipe_buffer_bytes: 64 * 1024,
            retry: RetryConfig::default(),
            heartbeat_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            stats_bind_address: "127.0.0.1:0".to_string(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(self.validation_error("work_dir cannot be empty"));
        }
        validate_positive(self.pipe_buffer_bytes, "pipe_buffer_bytes", self.domain_name())?;
        validate_positive(
            self.heartbeat_interval.as_millis(),
            "heartbeat_interval",
            self.domain_name(),
        )?;
        validate_positive(
            self.connect_timeout.as_millis(),
            "connect_timeout",
            self.domain_name(),
        )?;
        validate_socket_address(
            &self.stats_bind_address,
            "stats_bind_address",
            self.domain_name(),
        )?;
        self.retry.validate()?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

impl Validatable for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(self.validation_error("multiplier must be a finite number of at least 1.0"));
        }
        if self.max_delay < self.delay {
            return Err(self.validation_error("max_delay cannot be shorter than delay"));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution.retry"
    }
}
