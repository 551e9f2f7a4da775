//! Logging configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigResult;
use crate::validation::Validatable;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,

    /// Include source file and line in every event
    pub include_location: bool,

    /// Extra `EnvFilter` directives appended after the level, e.g.
    /// `shardflow_sort=debug`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directives: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// How events are rendered on stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
    Compact,
    Pretty,
}

const LEVEL_NAMES: &[(&str, LogLevel)] = &[
    ("error", LogLevel::Error),
    ("warn", LogLevel::Warn),
    ("warning", LogLevel::Warn),
    ("info", LogLevel::Info),
    ("debug", LogLevel::Debug),
    ("trace", LogLevel::Trace),
];

const FORMAT_NAMES: &[(&str, LogFormat)] = &[
    ("text", LogFormat::Text),
    ("json", LogFormat::Json),
    ("compact", LogFormat::Compact),
    ("pretty", LogFormat::Pretty),
];

fn lookup<T: Copy>(table: &[(&str, T)], kind: &str, value: &str) -> Result<T, String> {
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, v)| *v)
        .ok_or_else(|| format!("Invalid log {}: {}", kind, value))
}

impl LogLevel {
    /// The level as an `EnvFilter` directive
    pub fn as_str(&self) -> &'static str {
        LEVEL_NAMES
            .iter()
            .find(|(_, level)| level == self)
            .map_or("info", |(name, _)| *name)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(LEVEL_NAMES, "level", s)
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(FORMAT_NAMES, "format", s)
    }
}

impl Validatable for LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        match &self.directives {
            Some(d) if d.trim().is_empty() => {
                Err(self.validation_error("directives cannot be blank when set"))
            }
            _ => Ok(()),
        }
    }

    fn domain_name(&self) -> &'static str {
        "logging"
    }
}
