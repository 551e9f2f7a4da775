//! Shard channel boundary
//!
//! Shards live on agents and are reached by dialing a named channel at the
//! agent's address. A dial is long-lived: it streams until the shard (for
//! reads) or the local producer (for writes) is exhausted. Cancellation is
//! the caller's business; dropping the returned future tears the connection
//! down.

use async_trait::async_trait;
use shardflow_core::ShardLocation;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::IpcError;
use crate::piper::{PipeWriter, StageReader};
use crate::protocol::{ChannelDirection, ChannelRequest, MessageEnvelope};
use crate::transport::LineTransport;

/// Client side of the shard channel transport
#[async_trait]
pub trait ShardChannelClient: Send + Sync {
    /// Stream the shard at `location` into `sink`, returning the bytes moved.
    /// The sink is closed when the shard ends.
    async fn dial_read(
        &self,
        instruction: &str,
        location: &ShardLocation,
        sink: PipeWriter,
    ) -> Result<u64, IpcError>;

    /// Stream everything from `source` into the shard at `location`,
    /// returning the bytes moved.
    async fn dial_write(
        &self,
        instruction: &str,
        location: &ShardLocation,
        source: StageReader,
        reader_count: u32,
    ) -> Result<u64, IpcError>;
}

/// Shard channels over plain TCP.
///
/// The connection opens with one [`ChannelRequest`] line, after which the
/// socket carries the raw shard bytes in the requested direction.
#[derive(Debug, Clone)]
pub struct TcpShardChannelClient {
    connect_timeout: Duration,
}

impl TcpShardChannelClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, request: ChannelRequest, address: &str) -> Result<TcpStream, IpcError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| IpcError::Timeout(address.to_string()))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut transport = LineTransport::new(read_half, write_half);
        transport.send(&MessageEnvelope::new(request)).await?;
        let (reader, writer) = transport.into_inner();
        if !reader.buffer().is_empty() {
            return Err(IpcError::Handshake(
                "agent sent data before the handshake completed".to_string(),
            ));
        }
        reader
            .into_inner()
            .reunite(writer)
            .map_err(|e| IpcError::Handshake(e.to_string()))
    }
}

impl Default for TcpShardChannelClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl ShardChannelClient for TcpShardChannelClient {
    async fn dial_read(
        &self,
        instruction: &str,
        location: &ShardLocation,
        mut sink: PipeWriter,
    ) -> Result<u64, IpcError> {
        debug!(
            "{} connecting to {} to read {}",
            instruction, location.address, location.name
        );
        let request = ChannelRequest {
            direction: ChannelDirection::Read,
            name: location.name.clone(),
            on_disk: location.on_disk,
            reader_count: None,
            instruction: instruction.to_string(),
        };
        let stream = self.connect(request, &location.address).await?;
        let mut stream = BufReader::new(stream);
        let moved = tokio::io::copy_buf(&mut stream, &mut sink).await?;
        sink.shutdown().await?;
        Ok(moved)
    }

    async fn dial_write(
        &self,
        instruction: &str,
        location: &ShardLocation,
        mut source: StageReader,
        reader_count: u32,
    ) -> Result<u64, IpcError> {
        debug!(
            "{} connecting to {} to write {} for {} readers",
            instruction, location.address, location.name, reader_count
        );
        let request = ChannelRequest {
            direction: ChannelDirection::Write,
            name: location.name.clone(),
            on_disk: location.on_disk,
            reader_count: Some(reader_count),
            instruction: instruction.to_string(),
        };
        let mut stream = self.connect(request, &location.address).await?;
        let moved = tokio::io::copy(&mut source, &mut stream).await?;
        stream.shutdown().await?;
        Ok(moved)
    }
}
