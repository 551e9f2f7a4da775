//! External sort configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SortConfig {
    /// Rows held in memory before a sorted run is spilled
    pub buffer_rows: usize,

    /// Parent of per-sort spill directories; the system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmp_root: Option<PathBuf>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            buffer_rows: 100_000,
            tmp_root: None,
        }
    }
}

impl SortConfig {
    pub fn tmp_root(&self) -> PathBuf {
        self.tmp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Validatable for SortConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.buffer_rows, "buffer_rows", self.domain_name())?;
        if let Some(root) = &self.tmp_root {
            if !root.is_dir() {
                return Err(self.validation_error(format!(
                    "tmp_root {} is not an existing directory",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "sort"
    }
}
