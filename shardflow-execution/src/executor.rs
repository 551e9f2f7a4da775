//! Instruction pipeline executor
//!
//! One call to [`Executor::execute_instruction_set`] runs one task. Every
//! stage, shard dial and format adapter runs as its own Tokio task on a
//! shared [`TaskTracker`] under a child of the caller's cancellation token.
//! The task ends on whichever comes first: a stage error, a shard I/O error,
//! cancellation from the caller, or every tracked task finishing.

use shardflow_config::{ShardflowConfig, SortConfig};
use shardflow_core::{Instruction, InstructionSet, InstructionStat, StatCounter};
use shardflow_ipc::{
    lines_to_rows, rows_to_lines, IpcError, Piper, ShardChannelClient, StageReader, StageWriter,
    TcpShardChannelClient,
};
use shardflow_resilience::{Backoff, RetryPolicy};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ExecutorError;
use crate::registry::FunctionRegistry;
use crate::stage::StageRunner;
use crate::stats::{spawn_heartbeat, StatsRegistry, StatsServer, StatusReporter, TracingReporter};

/// Runtime settings of an [`Executor`]
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Where row-mode scripts live and where every subprocess runs
    pub work_dir: PathBuf,
    pub pipe_buffer_bytes: usize,
    /// Start policy for subprocess stages
    pub retry: RetryPolicy,
    pub heartbeat_interval: Duration,
    /// Bound on waiting for stages after a failure or cancellation
    pub shutdown_timeout: Duration,
    pub connect_timeout: Duration,
    pub stats_bind_address: String,
    pub sort: SortConfig,
}

impl ExecutorOptions {
    pub fn from_config(config: &ShardflowConfig) -> Self {
        let execution = &config.execution;
        Self {
            work_dir: execution.work_dir.clone(),
            pipe_buffer_bytes: execution.pipe_buffer_bytes,
            retry: RetryPolicy::fixed(execution.retry.max_attempts, execution.retry.delay)
                .with_backoff(
                    Backoff::growing(
                        execution.retry.delay,
                        execution.retry.multiplier,
                        execution.retry.max_delay,
                    )
                    .with_jitter(execution.retry.jitter),
                ),
            heartbeat_interval: execution.heartbeat_interval,
            shutdown_timeout: execution.shutdown_timeout,
            connect_timeout: execution.connect_timeout,
            stats_bind_address: execution.stats_bind_address.clone(),
            sort: config.sort.clone(),
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_config(&ShardflowConfig::default())
    }
}

/// Handles shared by everything spawned for one task
struct TaskScope {
    tracker: TaskTracker,
    cancel: CancellationToken,
    io_errors: mpsc::Sender<ExecutorError>,
}

fn report(errors: &mpsc::Sender<ExecutorError>, err: ExecutorError) {
    if let Err(e) = errors.try_send(err) {
        debug!("Error not reported: {}", e);
    }
}

/// Runs instruction sets on the local node
pub struct Executor {
    options: ExecutorOptions,
    registry: Arc<FunctionRegistry>,
    client: Arc<dyn ShardChannelClient>,
    reporter: Arc<dyn StatusReporter>,
}

impl Executor {
    /// An executor dialing shards over TCP and logging its status
    pub fn new(options: ExecutorOptions, registry: FunctionRegistry) -> Self {
        let client = Arc::new(TcpShardChannelClient::new(options.connect_timeout));
        Self {
            options,
            registry: Arc::new(registry),
            client,
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_channel_client(mut self, client: Arc<dyn ShardChannelClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Run every instruction of `set` concurrently.
    ///
    /// Returns the final counters of each instruction on success, or the
    /// first failure. Nothing spawned for the task outlives this call unless
    /// stages ignore cancellation for longer than the shutdown timeout.
    pub async fn execute_instruction_set(
        &self,
        set: &InstructionSet,
        cancel: CancellationToken,
    ) -> Result<Vec<InstructionStat>, ExecutorError> {
        set.validate()?;
        let started = Instant::now();
        let stage_count = set.len();

        let counters: Vec<Arc<StatCounter>> = set
            .instructions
            .iter()
            .map(|i| Arc::new(StatCounter::new(i.step_id, i.task_id)))
            .collect();
        let stats = Arc::new(StatsRegistry::new(set.flow_hash_code, counters.clone()));

        // listener and heartbeat stop on every return path
        let services = CancellationToken::new();
        let _stop_services = services.clone().drop_guard();
        let server = StatsServer::bind(&self.options.stats_bind_address, stats.clone(), services.clone())
            .await
            .map_err(ExecutorError::StatsListener)?;
        let stats_address = server.local_addr().to_string();

        let runners = set
            .instructions
            .iter()
            .map(|instruction| {
                StageRunner::resolve(
                    instruction,
                    set,
                    &self.registry,
                    &stats_address,
                    &self.options.work_dir,
                    &self.options.retry,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            flow_hash_code = set.flow_hash_code,
            instructions = ?set.instruction_names(),
            stats_address = %stats_address,
            agent = set.agent_address.as_deref().unwrap_or("-"),
            "Executing instruction set"
        );

        let task = cancel.child_token();
        let shard_count = set.instructions.first().map_or(0, |i| i.input_shard_locations.len())
            + set.instructions.last().map_or(0, |i| i.output_shard_locations.len());
        let (io_tx, mut io_rx) = mpsc::channel(2 * stage_count + shard_count);
        let (exe_tx, mut exe_rx) = mpsc::channel(stage_count);
        let scope = TaskScope {
            tracker: TaskTracker::new(),
            cancel: task.clone(),
            io_errors: io_tx,
        };

        let mut previous: Option<StageReader> = None;
        let mut previous_emits_lines = false;
        for (index, (instruction, runner)) in set.instructions.iter().zip(runners).enumerate() {
            let is_first = index == 0;
            let is_last = index + 1 == stage_count;
            let consumes_lines = instruction.emits_lines();

            let mut readers = if is_first {
                self.dial_inputs(instruction, &scope)
            } else {
                previous.take().into_iter().collect()
            };
            if previous_emits_lines && !consumes_lines {
                readers = readers
                    .into_iter()
                    .map(|reader| {
                        let (rows, pump) = lines_to_rows(reader, self.options.pipe_buffer_bytes);
                        self.spawn_pump(&scope, &instruction.name, "lines to rows", pump);
                        rows
                    })
                    .collect();
            } else if !previous_emits_lines && consumes_lines {
                readers = readers
                    .into_iter()
                    .map(|reader| {
                        let (lines, pump) = rows_to_lines(reader, self.options.pipe_buffer_bytes);
                        self.spawn_pump(&scope, &instruction.name, "rows to lines", pump);
                        lines
                    })
                    .collect();
            }

            let writers = if is_last {
                self.dial_outputs(instruction, set.reader_count, &scope)
            } else {
                let (reader, writer) = Piper::new(self.options.pipe_buffer_bytes).split();
                previous = Some(reader.boxed());
                vec![writer.boxed()]
            };
            previous_emits_lines = instruction.emits_lines();

            let name = instruction.name.clone();
            let stat = counters[index].clone();
            let sort = self.options.sort.clone();
            let cancel = task.clone();
            let errors = exe_tx.clone();
            let tasks = scope.tracker.clone();
            scope.tracker.spawn(async move {
                debug!(instruction = %name, "Stage started");
                match runner.run(&name, readers, writers, stat, &sort, cancel, tasks).await {
                    Ok(()) => debug!(instruction = %name, "Stage finished"),
                    Err(e) if e.is_cancelled() => debug!(instruction = %name, "Stage cancelled"),
                    Err(e) => report(&errors, e),
                }
            });
        }
        drop(exe_tx);
        let tracker = scope.tracker.clone();
        drop(scope);
        tracker.close();

        let heartbeat = spawn_heartbeat(
            stats.clone(),
            self.reporter.clone(),
            self.options.heartbeat_interval,
            services.clone(),
        );

        let outcome = tokio::select! {
            biased;
            Some(err) = exe_rx.recv() => Err(err),
            Some(err) = io_rx.recv() => Err(err),
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
            _ = tracker.wait() => Ok(()),
        };

        let result = match outcome {
            Ok(()) => {
                let snapshot = stats.snapshot();
                self.reporter.completed(set.flow_hash_code, &snapshot).await;
                info!(
                    flow_hash_code = set.flow_hash_code,
                    elapsed = ?started.elapsed(),
                    "Instruction set completed"
                );
                Ok(snapshot)
            }
            Err(err) => {
                if err.is_cancelled() {
                    info!(flow_hash_code = set.flow_hash_code, "Instruction set cancelled");
                } else {
                    error!(
                        flow_hash_code = set.flow_hash_code,
                        instruction = err.instruction().unwrap_or("-"),
                        "{}",
                        err
                    );
                }
                task.cancel();
                let drained = tokio::time::timeout(self.options.shutdown_timeout, tracker.wait())
                    .await
                    .is_ok();
                while let Ok(later) = exe_rx.try_recv().or_else(|_| io_rx.try_recv()) {
                    debug!("After first failure: {}", later);
                }

                match err {
                    ExecutorError::Cancelled if !drained => {
                        Err(ExecutorError::ShutdownTimeout(self.options.shutdown_timeout))
                    }
                    err => {
                        if !drained {
                            warn!(
                                timeout = ?self.options.shutdown_timeout,
                                remaining = tracker.len(),
                                "Stages still running after cancellation"
                            );
                        }
                        Err(err)
                    }
                }
            }
        };

        services.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task failed: {}", e);
        }
        server.stopped().await;
        result
    }

    /// One dial per input shard, each streaming into a fresh pipe
    fn dial_inputs(&self, instruction: &Instruction, scope: &TaskScope) -> Vec<StageReader> {
        instruction
            .input_shard_locations
            .iter()
            .map(|location| {
                let (reader, writer) = Piper::new(self.options.pipe_buffer_bytes).split();
                let client = self.client.clone();
                let location = location.clone();
                let name = instruction.name.clone();
                let cancel = scope.cancel.clone();
                let errors = scope.io_errors.clone();
                scope.tracker.spawn(async move {
                    tokio::select! {
                        res = client.dial_read(&name, &location, writer) => match res {
                            Ok(bytes) => debug!(instruction = %name, shard = %location.name, bytes, "Shard read"),
                            Err(source) => report(&errors, ExecutorError::ReadShard {
                                instruction: name.clone(),
                                shard: location.name.clone(),
                                address: location.address.clone(),
                                source,
                            }),
                        },
                        _ = cancel.cancelled() => {}
                    }
                });
                reader.boxed()
            })
            .collect()
    }

    /// One dial per output shard. Shards carry rows, so a line-emitting last
    /// stage is converted on the way out.
    fn dial_outputs(
        &self,
        instruction: &Instruction,
        reader_count: u32,
        scope: &TaskScope,
    ) -> Vec<StageWriter> {
        instruction
            .output_shard_locations
            .iter()
            .map(|location| {
                let (reader, writer) = Piper::new(self.options.pipe_buffer_bytes).split();
                let mut source = reader.boxed();
                if instruction.emits_lines() {
                    let (rows, pump) = lines_to_rows(source, self.options.pipe_buffer_bytes);
                    self.spawn_pump(scope, &instruction.name, "lines to rows", pump);
                    source = rows;
                }

                let client = self.client.clone();
                let location = location.clone();
                let name = instruction.name.clone();
                let cancel = scope.cancel.clone();
                let errors = scope.io_errors.clone();
                scope.tracker.spawn(async move {
                    tokio::select! {
                        res = client.dial_write(&name, &location, source, reader_count) => match res {
                            Ok(bytes) => debug!(instruction = %name, shard = %location.name, bytes, "Shard written"),
                            Err(source) => report(&errors, ExecutorError::WriteShard {
                                instruction: name.clone(),
                                shard: location.name.clone(),
                                address: location.address.clone(),
                                source,
                            }),
                        },
                        _ = cancel.cancelled() => {}
                    }
                });
                writer.boxed()
            })
            .collect()
    }

    fn spawn_pump<F>(&self, scope: &TaskScope, instruction: &str, conversion: &'static str, pump: F)
    where
        F: Future<Output = Result<u64, IpcError>> + Send + 'static,
    {
        let name = instruction.to_string();
        let cancel = scope.cancel.clone();
        let errors = scope.io_errors.clone();
        scope.tracker.spawn(async move {
            tokio::select! {
                res = pump => match res {
                    Ok(count) => debug!(instruction = %name, conversion, count, "Conversion finished"),
                    Err(source) => report(&errors, ExecutorError::Adapter {
                        instruction: name.clone(),
                        conversion,
                        source,
                    }),
                },
                _ = cancel.cancelled() => {}
            }
        });
    }
}
