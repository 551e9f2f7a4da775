//! Task statistics: live counters, the callback listener and status reports

use async_trait::async_trait;
use shardflow_core::{InstructionSet, InstructionStat, StatCounter};
use shardflow_ipc::{IpcError, LineTransport, MessageEnvelope, StatsRequest, StatsResponse};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters of every instruction in one task, in pipeline order
#[derive(Debug)]
pub struct StatsRegistry {
    flow_hash_code: u32,
    counters: Vec<Arc<StatCounter>>,
}

impl StatsRegistry {
    pub fn new(flow_hash_code: u32, counters: Vec<Arc<StatCounter>>) -> Self {
        Self {
            flow_hash_code,
            counters,
        }
    }

    /// One zeroed counter per instruction
    pub fn for_instruction_set(set: &InstructionSet) -> Self {
        let counters = set
            .instructions
            .iter()
            .map(|i| Arc::new(StatCounter::new(i.step_id, i.task_id)))
            .collect();
        Self::new(set.flow_hash_code, counters)
    }

    pub fn flow_hash_code(&self) -> u32 {
        self.flow_hash_code
    }

    pub fn counter(&self, index: usize) -> Option<Arc<StatCounter>> {
        self.counters.get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<InstructionStat> {
        self.counters.iter().map(|c| c.snapshot()).collect()
    }

    /// Overwrite counters with stats reported by a subprocess.
    /// Returns how many counters matched.
    pub fn apply_report(&self, stats: &[InstructionStat]) -> usize {
        let mut updated = 0;
        for stat in stats {
            for counter in self.counters.iter().filter(|c| c.matches(stat)) {
                counter.overwrite(stat);
                updated += 1;
            }
        }
        updated
    }
}

/// The callback address handed to subprocess stages.
///
/// Speaks newline-delimited [`MessageEnvelope`]s: `Query` returns a
/// snapshot, `Report` overwrites counters. Runs until its token is cancelled.
#[derive(Debug)]
pub struct StatsServer {
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl StatsServer {
    pub async fn bind(
        address: &str,
        registry: Arc<StatsRegistry>,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, flow_hash_code = registry.flow_hash_code(), "Stats listener started");

        let handle = tokio::spawn(serve(listener, registry, cancel));
        Ok(Self { local_addr, handle })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the accept loop to exit after cancellation
    pub async fn stopped(self) {
        if let Err(e) = self.handle.await {
            warn!("Stats listener task failed: {}", e);
        }
    }
}

async fn serve(listener: TcpListener, registry: Arc<StatsRegistry>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Stats connection accepted");
                    let registry = registry.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registry, cancel).await {
                            debug!(%peer, "Stats connection ended: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept stats connection: {}", e),
            },
        }
    }
    debug!("Stats listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<StatsRegistry>,
    cancel: CancellationToken,
) -> Result<(), IpcError> {
    let (read_half, write_half) = stream.into_split();
    let mut transport = LineTransport::new(read_half, write_half);

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            received = transport.receive::<StatsRequest>() => received,
        };

        let response = match received {
            Ok(envelope) => match envelope.message {
                StatsRequest::Query => StatsResponse::Snapshot {
                    flow_hash_code: registry.flow_hash_code(),
                    stats: registry.snapshot(),
                },
                StatsRequest::Report { stats } => StatsResponse::Ack {
                    updated: registry.apply_report(&stats),
                },
            },
            Err(IpcError::ConnectionClosed) => return Ok(()),
            Err(e) if e.is_connection_error() => return Err(e),
            Err(e) => StatsResponse::Error {
                message: e.to_string(),
            },
        };
        transport.send(&MessageEnvelope::new(response)).await?;
    }
}

/// Ask a running executor for its counters
pub async fn query_stats(address: &str) -> Result<(u32, Vec<InstructionStat>), IpcError> {
    let stream = TcpStream::connect(address).await?;
    let (read_half, write_half) = stream.into_split();
    let mut transport = LineTransport::new(read_half, write_half);

    transport.send(&MessageEnvelope::new(StatsRequest::Query)).await?;
    match transport.receive::<StatsResponse>().await?.message {
        StatsResponse::Snapshot {
            flow_hash_code,
            stats,
        } => Ok((flow_hash_code, stats)),
        StatsResponse::Error { message } => Err(IpcError::Rejected(message)),
        other => Err(IpcError::Rejected(format!(
            "unexpected response to a stats query: {:?}",
            other
        ))),
    }
}

/// Receives task progress while it runs and once on success
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn heartbeat(&self, flow_hash_code: u32, stats: &[InstructionStat]);

    async fn completed(&self, flow_hash_code: u32, stats: &[InstructionStat]);
}

/// Logs progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

#[async_trait]
impl StatusReporter for TracingReporter {
    async fn heartbeat(&self, flow_hash_code: u32, stats: &[InstructionStat]) {
        for stat in stats {
            debug!(
                flow_hash_code,
                step_id = stat.step_id,
                task_id = stat.task_id,
                input = stat.input_counter,
                output = stat.output_counter,
                "Heartbeat"
            );
        }
    }

    async fn completed(&self, flow_hash_code: u32, stats: &[InstructionStat]) {
        for stat in stats {
            info!(
                flow_hash_code,
                step_id = stat.step_id,
                task_id = stat.task_id,
                input = stat.input_counter,
                output = stat.output_counter,
                "Instruction completed"
            );
        }
    }
}

/// Send a snapshot to `reporter` every `period` until cancelled
pub(crate) fn spawn_heartbeat(
    registry: Arc<StatsRegistry>,
    reporter: Arc<dyn StatusReporter>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    reporter.heartbeat(registry.flow_hash_code(), &registry.snapshot()).await;
                }
            }
        }
    })
}
