//! Errors moving rows and control messages between processes

use shardflow_core::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// Row payload could not be decoded
    #[error("Row codec error: {0}")]
    Codec(#[from] CodecError),

    /// Broken length-prefixed row framing
    #[error("Bad row frame: {0}")]
    Frame(String),

    #[error("Channel handshake failed: {0}")]
    Handshake(String),

    /// The peer answered with an error or with the wrong kind of response
    #[error("Peer rejected request: {0}")]
    Rejected(String),

    /// The peer closed the connection before a complete message arrived
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    #[error("Timeout connecting to {0}")]
    Timeout(String),
}

impl IpcError {
    /// Whether the connection itself failed, as opposed to a bad message on
    /// a working connection
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            IpcError::Io(_) | IpcError::Timeout(_) | IpcError::ConnectionClosed
        )
    }
}
