//! Shared fixtures for the end-to-end tests: an in-process agent serving
//! shard channels over TCP and helpers for building executors.

#![allow(dead_code)]

use shardflow_config::SortConfig;
use shardflow_core::{Datum, ShardLocation};
use shardflow_execution::ExecutorOptions;
use shardflow_ipc::{read_row, write_row, ChannelDirection, ChannelRequest, LineTransport};
use shardflow_resilience::RetryPolicy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Keep test output to warnings unless RUST_LOG says otherwise
pub fn init_quiet_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Serves shard reads from memory and records shard writes.
///
/// Shards whose name starts with `hang` accept the dial and never send data.
pub struct FakeAgent {
    address: String,
    written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    handle: JoinHandle<()>,
}

impl FakeAgent {
    pub async fn start(shards: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let shards = Arc::new(shards);
        let written = Arc::new(Mutex::new(HashMap::new()));

        let handle = {
            let written = written.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    let shards = shards.clone();
                    let written = written.clone();
                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        let mut transport = LineTransport::new(read_half, write_half);
                        let Ok(envelope) = transport.receive::<ChannelRequest>().await else {
                            return;
                        };
                        let request = envelope.message;
                        let (mut reader, mut writer) = transport.into_inner();

                        match request.direction {
                            ChannelDirection::Read if request.name.starts_with("hang") => {
                                let _held = writer;
                                std::future::pending::<()>().await;
                            }
                            ChannelDirection::Read => {
                                if let Some(data) = shards.get(&request.name) {
                                    let _ = writer.write_all(data).await;
                                }
                                let _ = writer.shutdown().await;
                            }
                            ChannelDirection::Write => {
                                let mut data = Vec::new();
                                if reader.read_to_end(&mut data).await.is_ok() {
                                    written.lock().unwrap().insert(request.name, data);
                                }
                            }
                        }
                    });
                }
            })
        };

        Self {
            address,
            written,
            handle,
        }
    }

    pub fn location(&self, name: &str) -> ShardLocation {
        ShardLocation::new(name, self.address.clone(), false)
    }

    /// Rows written to `name`; waits briefly since the agent finishes reading
    /// after the writer has already returned
    pub async fn written_rows(&self, name: &str) -> Vec<Vec<Datum>> {
        let written = self.written.clone();
        let key = name.to_string();
        wait_until(Duration::from_secs(5), move || {
            written.lock().unwrap().contains_key(&key)
        })
        .await;
        let data = self
            .written
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();
        decode_rows(&data).await
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn encode_rows(rows: &[Vec<Datum>]) -> Vec<u8> {
    let mut data = Vec::new();
    for row in rows {
        write_row(&mut data, row).await.unwrap();
    }
    data
}

pub async fn decode_rows(data: &[u8]) -> Vec<Vec<Datum>> {
    let mut reader = data;
    let mut rows = Vec::new();
    while let Some(row) = read_row(&mut reader).await.unwrap() {
        rows.push(row);
    }
    rows
}

pub fn text_rows(values: &[&str]) -> Vec<Vec<Datum>> {
    values.iter().map(|v| vec![Datum::from(*v)]).collect()
}

pub fn int_rows(values: &[i64]) -> Vec<Vec<Datum>> {
    values.iter().map(|v| vec![Datum::Int(*v)]).collect()
}

pub fn executor_options(work_dir: &Path) -> ExecutorOptions {
    ExecutorOptions {
        work_dir: work_dir.to_path_buf(),
        retry: RetryPolicy::fixed(3, Duration::from_millis(50)),
        heartbeat_interval: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        sort: SortConfig {
            buffer_rows: 2,
            tmp_root: Some(work_dir.to_path_buf()),
        },
        ..ExecutorOptions::default()
    }
}

/// Shell snippet counting its own runs in `attempts` under the work dir
pub const COUNT_ATTEMPTS: &str =
    "n=$(cat attempts 2>/dev/null || echo 0); n=$((n+1)); echo $n > attempts;";

pub fn attempts(work_dir: &Path) -> u32 {
    std::fs::read_to_string(work_dir.join("attempts"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Poll `check` until it holds or the timeout passes
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
