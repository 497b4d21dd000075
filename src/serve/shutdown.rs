use std::time::Duration;
use tokio::signal;

/// How long in-flight connections get to drain before the process is killed.
const FORCED_EXIT_AFTER: Duration = Duration::from_secs(5);

/// Wait for shutdown signals (Ctrl+C or SIGTERM), then arm the forced exit.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    tokio::spawn(async {
        tokio::time::sleep(FORCED_EXIT_AFTER).await;
        tracing::error!("Server did not close within {:?}; forcing exit", FORCED_EXIT_AFTER);
        std::process::exit(1);
    });
}
