// Shutdown signal handling.
//
// `wait_for_shutdown_signal` completes on SIGINT, SIGTERM, SIGQUIT or
// Ctrl-C. `shutdown_channel` fans one signal out to every component that
// needs to drain (push service, HTTP server).

use tokio::sync::watch;
use tracing::{info, warn};

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Spawn a task that flips the returned channel to `true` on the first
/// termination signal.
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!(error = %e, "Failed to install signal handlers, shutting down");
        } else {
            info!("Termination signal received");
        }
        tx.send_replace(true);
    });
    rx
}

/// Completes once `rx` reads `true` or its sender is gone.
pub async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_requested_completes_on_flip() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(shutdown_requested(rx));
        tx.send_replace(true);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_completes_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        shutdown_requested(rx).await;
    }
}
