//! Shardflow execution engine
//!
//! This crate runs one task's instruction pipeline on the local node: it
//! wires each stage to in-process pipes or shard channels, runs stages as
//! built-in functions or subprocesses, and supervises the whole task under a
//! single cancellation token.

pub mod error;
pub mod executor;
pub mod functions;
pub mod process;
pub mod registry;
pub mod stage;
pub mod stats;

// Re-export main types
pub use error::ExecutorError;
pub use executor::{Executor, ExecutorOptions};
pub use functions::{LocalSort, MergeSortedTo, MergeTo, OrderBy, Pass};
pub use process::{AttemptError, ProcessError, ProcessStage};
pub use registry::{FunctionContext, FunctionRegistry, InstructionFunction};
pub use stats::{query_stats, StatsRegistry, StatsServer, StatusReporter, TracingReporter};
