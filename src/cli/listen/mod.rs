//! Listen command - applies invalidation events until interrupted

use tokio::signal;
use tracing::{error, info};

use crate::CoordinationContext;

/// Run the invalidation listener in the foreground
pub async fn run() -> anyhow::Result<()> {
    let config = super::bootstrap()?;
    let context = CoordinationContext::from_config(&config).await?;

    let listener = context.listener();
    info!(channel = %listener.channel(), "Starting invalidation listener");

    let handle = listener.spawn();
    shutdown_signal().await;

    handle.abort();
    info!("Invalidation listener stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
