//! Sort engine error types

use shardflow_core::{CodecError, DatumError};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where in the sort a comparison failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPhase {
    Spill,
    InMemorySort,
    MergePrime,
    Merge,
}

impl fmt::Display for SortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortPhase::Spill => write!(f, "spill"),
            SortPhase::InMemorySort => write!(f, "in-memory sort"),
            SortPhase::MergePrime => write!(f, "merge-prime"),
            SortPhase::Merge => write!(f, "merge"),
        }
    }
}

/// Errors returned by [`crate::FileSorter`]
#[derive(Debug, Error)]
pub enum SortError {
    /// Invalid builder parameters
    #[error("invalid sorter configuration: {0}")]
    Config(String),

    #[error("file sorter has been closed")]
    Closed,

    #[error("input called after output")]
    InputAfterOutput,

    /// An earlier output error left the merge in an unknown state
    #[error("file sorter failed earlier and cannot continue")]
    Poisoned,

    #[error("mismatch in {what} size: expected {expected}, got {actual}")]
    SchemaMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("spill to {} failed: {source}", path.display())]
    Spill {
        path: PathBuf,
        #[source]
        source: RunError,
    },

    #[error("merge-prime of run {run} failed: {source}")]
    MergePrime {
        run: usize,
        #[source]
        source: RunError,
    },

    #[error("run-read of run {run} failed: {source}")]
    RunRead {
        run: usize,
        #[source]
        source: RunError,
    },

    #[error("comparison failed during {phase}: {source}")]
    Compare {
        phase: SortPhase,
        #[source]
        source: DatumError,
    },

    #[error("failed to remove working directory {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors reading or writing a single run file
#[derive(Debug, Error)]
pub enum RunError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("incorrect header: read {0} of 8 bytes")]
    IncorrectHeader(usize),

    #[error("incorrect row: declared {declared} bytes, read {actual}")]
    IncorrectRow { declared: u64, actual: usize },

    #[error("declared row length {0} exceeds the record limit")]
    OversizedRow(u64),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("row handle is not an integer")]
    BadHandle,

    #[error("run file is empty")]
    Empty,
}
