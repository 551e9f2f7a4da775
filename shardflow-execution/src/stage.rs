//! Stage runners
//!
//! Every instruction is resolved once, before anything starts, into either a
//! registered function or a subprocess. Running a stage hands it its wired
//! readers and writers and reports failures under the instruction's name.

use serde_json::Value as JsonValue;
use shardflow_config::SortConfig;
use shardflow_core::{Instruction, InstructionSet, Operation, StatCounter};
use shardflow_ipc::{StageReader, StageWriter};
use shardflow_resilience::RetryPolicy;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::error::ExecutorError;
use crate::process::{ProcessError, ProcessStage};
use crate::registry::{FunctionContext, FunctionRegistry, InstructionFunction};

/// How one instruction is executed
pub(crate) enum StageRunner {
    Function {
        function: Arc<dyn InstructionFunction>,
        options: JsonValue,
    },
    Process(ProcessStage),
}

impl StageRunner {
    pub(crate) fn resolve(
        instruction: &Instruction,
        set: &InstructionSet,
        registry: &FunctionRegistry,
        stats_address: &str,
        work_dir: &Path,
        retry: &RetryPolicy,
    ) -> Result<Self, ExecutorError> {
        match &instruction.operation {
            Operation::Function { function, options } => {
                let resolved =
                    registry
                        .get(function)
                        .ok_or_else(|| ExecutorError::UnresolvedInstruction {
                            instruction: instruction.name.clone(),
                            function: function.clone(),
                        })?;
                Ok(StageRunner::Function {
                    function: resolved,
                    options: options.clone(),
                })
            }
            Operation::Script(script) => Ok(StageRunner::Process(ProcessStage::from_script(
                instruction,
                script,
                set,
                stats_address,
                work_dir,
                retry.clone(),
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn run(
        &self,
        instruction: &str,
        readers: Vec<StageReader>,
        writers: Vec<StageWriter>,
        stat: Arc<StatCounter>,
        sort: &SortConfig,
        cancel: CancellationToken,
        tasks: TaskTracker,
    ) -> Result<(), ExecutorError> {
        match self {
            StageRunner::Function { function, options } => {
                let ctx = FunctionContext {
                    instruction: instruction.to_string(),
                    options: options.clone(),
                    stat,
                    sort: sort.clone(),
                    cancel: cancel.clone(),
                    tasks,
                };
                run_function(function.as_ref(), readers, writers, &ctx).await
            }
            StageRunner::Process(stage) => stage
                .run(readers, writers, stat, cancel)
                .await
                .map_err(|source| match source {
                    ProcessError::Cancelled => ExecutorError::Cancelled,
                    source => ExecutorError::CommandFailed {
                        instruction: instruction.to_string(),
                        source,
                    },
                }),
        }
    }
}

async fn run_function(
    function: &dyn InstructionFunction,
    readers: Vec<StageReader>,
    writers: Vec<StageWriter>,
    ctx: &FunctionContext,
) -> Result<(), ExecutorError> {
    let mut writers: Vec<StageWriter> = writers
        .into_iter()
        .map(|w| Box::new(BufWriter::new(w)) as StageWriter)
        .collect();

    let mut result = tokio::select! {
        res = function.run(readers, &mut writers, ctx) => res,
        _ = ctx.cancel.cancelled() => {
            debug!(instruction = %ctx.instruction, "Function cancelled");
            return Err(ExecutorError::Cancelled);
        }
    };

    // closing flushes buffered rows and ends the stream for the next stage
    for writer in writers.iter_mut() {
        if let Err(e) = writer.shutdown().await {
            if result.is_ok() {
                result = Err(anyhow::Error::new(e).context("closing output"));
            }
        }
    }

    result.map_err(|source| ExecutorError::FunctionFailed {
        instruction: ctx.instruction.clone(),
        source,
    })
}
