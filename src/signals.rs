use tokio_util::sync::CancellationToken;

/// What should we do when the user stops this program?
///
/// Resolves on SIGINT or SIGTERM after cancelling `sessions`, so every open
/// log stream tears down and the server's graceful shutdown can finish.
pub async fn shutdown_signal(sessions: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Unable to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::warn!("Received shutdown signal, closing all log sessions");
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
    sessions.cancel();
}
