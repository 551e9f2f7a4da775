//! Subprocess pipeline stages
//!
//! A script instruction runs as a child process. Its first input is fed to
//! stdin and stdout is forwarded to its first output; stderr is inherited.
//! Starting the process is retried, but only while no attempt has moved any
//! bytes in either direction, so a partially processed input is never
//! replayed.

use shardflow_core::{Instruction, InstructionSet, Script, StatCounter};
use shardflow_ipc::{StageReader, StageWriter};
use shardflow_resilience::{RetryExecutor, RetryPolicy, Retryable};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHUNK_BYTES: usize = 64 * 1024;

/// Subprocess failures
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },

    #[error("failed feeding stdin of {program}: {source}")]
    Stdin {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed forwarding stdout of {program}: {source}")]
    Stdout {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("subprocess cancelled")]
    Cancelled,
}

/// Outcome of one failed start, with how much data it moved
#[derive(Debug)]
pub struct AttemptError {
    /// Bytes accepted by the child's stdin
    pub delivered: u64,
    /// Bytes read from the child's stdout
    pub emitted: u64,
    pub error: ProcessError,
}

impl AttemptError {
    fn untouched(error: ProcessError) -> Self {
        Self {
            delivered: 0,
            emitted: 0,
            error,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delivered == 0 && self.emitted == 0 {
            write!(f, "{}", self.error)
        } else {
            write!(
                f,
                "{} after {} bytes in and {} bytes out",
                self.error, self.delivered, self.emitted
            )
        }
    }
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        self.delivered == 0 && self.emitted == 0 && !matches!(self.error, ProcessError::Cancelled)
    }
}

/// Streams owned by a stage across its start attempts
struct StageStdio {
    source: Option<StageReader>,
    /// Read from the source but not yet accepted by any child
    pending: Vec<u8>,
    sink: StageWriter,
}

/// A resolved script instruction
#[derive(Debug, Clone)]
pub struct ProcessStage {
    instruction: String,
    program: PathBuf,
    args: Vec<String>,
    work_dir: PathBuf,
    retry: RetryPolicy,
}

impl ProcessStage {
    pub fn new(
        instruction: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        work_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            program: program.into(),
            args,
            work_dir: work_dir.into(),
            retry,
        }
    }

    /// Build the command line for `script`.
    ///
    /// Row-mode scripts are shardflow-aware executables shipped into the work
    /// directory: they run from there and get the callback flags appended.
    /// Pipe scripts run exactly as written.
    pub fn from_script(
        instruction: &Instruction,
        script: &Script,
        set: &InstructionSet,
        stats_address: &str,
        work_dir: &Path,
        retry: RetryPolicy,
    ) -> Self {
        let mut args = script.args.clone();
        let program = if script.is_pipe {
            PathBuf::from(&script.path)
        } else {
            args.extend([
                "-gleam.executor".to_string(),
                stats_address.to_string(),
                "-flow.hashcode".to_string(),
                set.flow_hash_code.to_string(),
                "-flow.stepId".to_string(),
                instruction.step_id.to_string(),
                "-flow.taskId".to_string(),
                instruction.task_id.to_string(),
            ]);
            if set.is_profiling {
                args.push("-gleam.profiling".to_string());
            }
            let executable = Path::new(&script.path)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&script.path));
            work_dir.join(executable)
        };

        Self::new(&instruction.name, program, args, work_dir, retry)
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run the stage to completion.
    ///
    /// Writers are always shut down before returning. Inputs beyond the first
    /// are discarded and outputs beyond the first are closed empty.
    pub async fn run(
        &self,
        readers: Vec<StageReader>,
        writers: Vec<StageWriter>,
        stat: Arc<StatCounter>,
        cancel: CancellationToken,
    ) -> Result<(), ProcessError> {
        let mut readers = readers.into_iter();
        let source = readers.next();
        let extra_readers: Vec<StageReader> = readers.collect();

        let mut writers = writers.into_iter();
        let sink: StageWriter = writers.next().unwrap_or_else(|| Box::new(tokio::io::sink()));
        for mut extra in writers {
            warn!(instruction = %self.instruction, "Closing unused subprocess output");
            if let Err(e) = extra.shutdown().await {
                debug!(instruction = %self.instruction, "Closing unused output failed: {}", e);
            }
        }
        if !extra_readers.is_empty() {
            warn!(
                instruction = %self.instruction,
                count = extra_readers.len(),
                "Subprocess reads only its first input, discarding the rest"
            );
        }

        let stdio = Arc::new(Mutex::new(StageStdio {
            source,
            pending: Vec::new(),
            sink,
        }));

        let result = RetryExecutor::new(self.retry.clone())
            .labelled(&self.instruction)
            .execute_with_context(|attempt| {
                let stdio = stdio.clone();
                let stat = stat.clone();
                let cancel = cancel.clone();
                async move {
                    let mut stdio = stdio.lock().await;
                    self.attempt(attempt, &mut stdio, &stat, &cancel).await
                }
            })
            .await
            .map_err(|e| e.into_inner().error);

        let mut stdio = stdio.lock().await;
        if result.is_ok() {
            // the child may exit without reading everything; unblock upstream
            let leftovers = stdio.source.take().into_iter().chain(extra_readers);
            let mut discard = tokio::io::sink();
            for mut reader in leftovers {
                tokio::select! {
                    res = tokio::io::copy(&mut reader, &mut discard) => {
                        if let Err(e) = res {
                            debug!(instruction = %self.instruction, "Discarding unread input failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        }
        if let Err(e) = stdio.sink.shutdown().await {
            debug!(instruction = %self.instruction, "Closing subprocess output failed: {}", e);
        }
        result
    }

    async fn attempt(
        &self,
        attempt: u32,
        stdio: &mut StageStdio,
        stat: &StatCounter,
        cancel: &CancellationToken,
    ) -> Result<(), AttemptError> {
        if cancel.is_cancelled() {
            return Err(AttemptError::untouched(ProcessError::Cancelled));
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.work_dir)
            .stdin(if stdio.source.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            AttemptError::untouched(ProcessError::Spawn {
                program: self.program_name(),
                source,
            })
        })?;
        debug!(
            instruction = %self.instruction,
            attempt,
            pid = child.id(),
            "Started {}",
            self.program.display()
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            AttemptError::untouched(ProcessError::Stdout {
                program: self.program_name(),
                source: io::Error::other("stdout was not captured"),
            })
        })?;

        let mut delivered = 0u64;
        let mut emitted = 0u64;
        let StageStdio {
            source,
            pending,
            sink,
        } = stdio;

        let outcome = {
            let run = async {
                let (fed, drained) = {
                    let feed = feed_stdin(stdin, source, pending, &mut delivered, stat);
                    let drain = drain_stdout(stdout, sink, &mut emitted, stat);
                    tokio::pin!(feed);
                    tokio::pin!(drain);

                    // stop feeding once stdout closes, the child is done with us
                    let mut fed = None;
                    let drained = loop {
                        tokio::select! {
                            res = &mut feed, if fed.is_none() => fed = Some(res),
                            res = &mut drain => break res,
                        }
                    };
                    (fed, drained)
                };
                let status = child.wait().await;
                (fed, drained, status)
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = run => Some(res),
            }
        };

        let fail = |error| AttemptError {
            delivered,
            emitted,
            error,
        };

        let Some((fed, drained, status)) = outcome else {
            info!(instruction = %self.instruction, "Killing {} on cancellation", self.program.display());
            if let Err(e) = child.kill().await {
                warn!(instruction = %self.instruction, "Failed to kill subprocess: {}", e);
            }
            return Err(fail(ProcessError::Cancelled));
        };

        let status = status.map_err(|source| {
            fail(ProcessError::Wait {
                program: self.program_name(),
                source,
            })
        })?;
        if !status.success() {
            return Err(fail(ProcessError::Exit {
                program: self.program_name(),
                status,
            }));
        }
        if let Err(source) = drained {
            return Err(fail(ProcessError::Stdout {
                program: self.program_name(),
                source,
            }));
        }
        if let Some(Err(source)) = fed {
            if source.kind() != io::ErrorKind::BrokenPipe {
                return Err(fail(ProcessError::Stdin {
                    program: self.program_name(),
                    source,
                }));
            }
        }

        debug!(
            instruction = %self.instruction,
            delivered,
            emitted,
            "{} finished",
            self.program.display()
        );
        Ok(())
    }
}

/// Copy the source into the child's stdin, replaying anything a previous
/// attempt read but never delivered. Clears `source` at end of input.
async fn feed_stdin(
    stdin: Option<ChildStdin>,
    source: &mut Option<StageReader>,
    pending: &mut Vec<u8>,
    delivered: &mut u64,
    stat: &StatCounter,
) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        if pending.is_empty() {
            let Some(reader) = source.as_mut() else {
                break;
            };
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                *source = None;
                break;
            }
            pending.extend_from_slice(&buf[..n]);
        }
        let n = stdin.write(pending).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        pending.drain(..n);
        *delivered += n as u64;
        stat.add_input(n as u64);
    }
    stdin.shutdown().await
}

async fn drain_stdout(
    mut stdout: ChildStdout,
    sink: &mut StageWriter,
    emitted: &mut u64,
    stat: &StatCounter,
) -> io::Result<()> {
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        *emitted += n as u64;
        stat.add_output(n as u64);
    }
    sink.flush().await
}
