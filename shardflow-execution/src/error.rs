//! Error types for pipeline execution

use shardflow_core::CoreError;
use shardflow_ipc::IpcError;
use std::time::Duration;
use thiserror::Error;

use crate::process::ProcessError;

/// Task execution errors; task failures name the offending instruction
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Invalid instruction set: {0}")]
    InvalidInstructionSet(#[from] CoreError),

    #[error("No function registered as {function} for instruction {instruction}")]
    UnresolvedInstruction {
        instruction: String,
        function: String,
    },

    #[error("Failed executing function {instruction}: {source:#}")]
    FunctionFailed {
        instruction: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed executing command {instruction}: {source}")]
    CommandFailed {
        instruction: String,
        #[source]
        source: ProcessError,
    },

    #[error("Failed {instruction} reading {shard} from {address}: {source}")]
    ReadShard {
        instruction: String,
        shard: String,
        address: String,
        #[source]
        source: IpcError,
    },

    #[error("Failed {instruction} writing {shard} to {address}: {source}")]
    WriteShard {
        instruction: String,
        shard: String,
        address: String,
        #[source]
        source: IpcError,
    },

    #[error("Failed {instruction} converting {conversion}: {source}")]
    Adapter {
        instruction: String,
        conversion: &'static str,
        #[source]
        source: IpcError,
    },

    #[error("Stats listener error: {0}")]
    StatsListener(#[source] std::io::Error),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Stages still running {0:?} after cancellation")]
    ShutdownTimeout(Duration),
}

impl ExecutorError {
    /// Name of the instruction the error is attributed to, if any
    pub fn instruction(&self) -> Option<&str> {
        match self {
            ExecutorError::UnresolvedInstruction { instruction, .. }
            | ExecutorError::FunctionFailed { instruction, .. }
            | ExecutorError::CommandFailed { instruction, .. }
            | ExecutorError::ReadShard { instruction, .. }
            | ExecutorError::WriteShard { instruction, .. }
            | ExecutorError::Adapter { instruction, .. } => Some(instruction),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled)
    }
}
