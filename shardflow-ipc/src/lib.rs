//! Inter-process plumbing for shardflow
//!
//! This crate provides the byte-stream connectors used between pipeline
//! stages, the row framing carried over them, the shard channel boundary to
//! remote agents, and the stats protocol spoken with subprocess stages.

pub mod adapter;
pub mod channel;
pub mod error;
pub mod piper;
pub mod protocol;
pub mod rows;
pub mod transport;

// Re-export commonly used types
pub use adapter::{lines_to_rows, rows_to_lines};
pub use channel::{ShardChannelClient, TcpShardChannelClient};
pub use error::IpcError;
pub use piper::{PipeReader, PipeWriter, Piper, StageReader, StageWriter, DEFAULT_PIPE_CAPACITY};
pub use protocol::{
    ChannelDirection, ChannelRequest, MessageEnvelope, StatsRequest, StatsResponse,
    IPC_PROTOCOL_VERSION,
};
pub use rows::{read_row, write_row, MAX_ROW_BYTES};
pub use transport::LineTransport;
