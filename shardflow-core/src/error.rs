//! Core error types for shardflow

use thiserror::Error;

/// Core error type for the data model
#[derive(Debug, Error)]
pub enum CoreError {
    /// Datum comparison errors
    #[error("Datum error: {0}")]
    Datum(#[from] DatumError),

    /// Datum encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The instruction set does not form a valid pipeline
    #[error("Invalid instruction set: {0}")]
    InvalidInstructionSet(String),
}

/// Errors raised while ordering datums
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatumError {
    #[error("cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot order a NaN float")]
    NotANumber,
}

/// Errors raised by the datum codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown datum tag {0:#04x}")]
    UnknownTag(u8),

    #[error("truncated datum: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("expected {expected} datums, found {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("{0} trailing bytes after the last datum")]
    TrailingBytes(usize),

    #[error("string datum is not valid UTF-8")]
    InvalidUtf8,
}
