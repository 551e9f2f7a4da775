//! Core data model for shardflow
//!
//! This crate holds the types shared by every other shardflow crate: typed
//! datums and their binary codec, the instruction pipeline description handed
//! to an executor, and the per-instruction statistics counters.

pub mod codec;
pub mod datum;
pub mod error;
pub mod instruction;
pub mod stats;

// Re-export main types
pub use codec::{decode_all, decode_datums, encode_datums};
pub use datum::{Collation, CompareContext, Datum};
pub use error::{CodecError, CoreError, DatumError};
pub use instruction::{Instruction, InstructionSet, Operation, Script, ShardLocation};
pub use stats::{InstructionStat, StatCounter};
