//! Resilience patterns for Shardflow
//!
//! Retry policies for re-running failed stages, and process signal handling
//! that feeds the executor's cancellation token.

pub mod backoff;
pub mod retry;
pub mod shutdown;

// Re-export commonly used types
pub use backoff::Backoff;
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::{cancel_on_signal, interrupt_token, shutdown_signal, ShutdownError};
