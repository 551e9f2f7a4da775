//! Control-plane message types
//!
//! Two small protocols share the envelope format: the stats protocol spoken
//! on an executor's callback address, and the handshake sent when dialing a
//! shard channel on an agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardflow_core::InstructionStat;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Requests accepted on an executor's stats address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsRequest {
    /// Ask for the current counters of every instruction
    Query,

    /// A subprocess stage reporting its own counters
    Report { stats: Vec<InstructionStat> },
}

/// Responses sent from an executor's stats address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatsResponse {
    Snapshot {
        flow_hash_code: u32,
        stats: Vec<InstructionStat>,
    },

    /// Number of instructions whose counters were replaced
    Ack { updated: usize },

    Error { message: String },
}

/// Direction of a shard channel dial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    Read,
    Write,
}

/// Handshake opening a shard channel connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub direction: ChannelDirection,
    pub name: String,
    pub on_disk: bool,
    /// Number of downstream readers the agent should expect, writers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_count: Option<u32>,
    /// Which instruction is dialing, for agent-side diagnostics
    pub instruction: String,
}

/// Versioned wrapper around every control message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
