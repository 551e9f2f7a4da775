//! Process signal handling
//!
//! Interrupts are turned into cancellation of a [`CancellationToken`], which
//! the executor treats as its cancellation context.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Failed to install signal handler: {0}")]
    SignalHandler(#[from] std::io::Error),
}

/// Resolve on the first Ctrl+C or SIGTERM
pub async fn shutdown_signal() -> Result<(), ShutdownError> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}

/// Cancel `token` when the process is interrupted.
///
/// The listener stops on its own once the token is cancelled for any other
/// reason.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            res = shutdown_signal() => match res {
                Ok(()) => {
                    info!("Shutdown signal received, cancelling");
                    token.cancel();
                }
                Err(e) => warn!("{}", e),
            },
            _ = token.cancelled() => {}
        }
    });
}

/// A fresh token that is cancelled on Ctrl+C or SIGTERM.
/// Must be called from within a Tokio runtime.
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    cancel_on_signal(token.clone());
    token
}
