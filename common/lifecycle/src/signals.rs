use tokio::signal::unix::SignalKind;
use tracing::{info, warn};

/// Resolves with the name of the first shutdown signal received (`SIGINT` or `SIGTERM`).
pub async fn wait_for_shutdown_signal() -> String {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let name = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    info!(signal = name, "received shutdown signal");
    name.to_string()
}
