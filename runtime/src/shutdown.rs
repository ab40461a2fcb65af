//! Graceful shutdown helpers.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
///
/// If a signal handler cannot be installed the error is logged and that
/// signal source is ignored; the other one still works.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        }
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        }
    }
}

/// Wait for background tasks to finish, giving each `timeout`.
///
/// Returns the number of tasks that stopped cleanly.
pub async fn await_tasks(handles: Vec<(String, JoinHandle<()>)>, timeout: Duration) -> usize {
    let mut stopped = 0;

    for (name, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!(task = %name, "Task stopped gracefully");
                stopped += 1;
            }
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed"),
            Err(_) => warn!(task = %name, "Task shutdown timed out"),
        }
    }

    stopped
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_only_clean_stops() {
        let finished = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());
        let panicked = tokio::spawn(async { panic!("boom") });

        let stopped = await_tasks(
            vec![
                ("finished".to_string(), finished),
                ("stuck".to_string(), stuck),
                ("panicked".to_string(), panicked),
            ],
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(stopped, 1);
    }
}
