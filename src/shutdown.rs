//! Unified shutdown signal
//!
//! OS signals and caller cancellation feed one token, so teardown is written
//! once against that token and runs at most once.

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Child of `parent` that is also cancelled on SIGINT or SIGTERM.
///
/// Must be called inside a tokio runtime. On unix both handlers are installed
/// before this returns and stay installed for the life of the process, so a
/// repeated signal during teardown is absorbed instead of killing it. The
/// watcher task exits as soon as the token fires from any source.
pub fn shutdown_token(parent: &CancellationToken) -> CancellationToken {
    let token = parent.child_token();

    #[cfg(unix)]
    let interrupt = install(signal::unix::SignalKind::interrupt(), "SIGINT");
    #[cfg(unix)]
    let terminate = install(signal::unix::SignalKind::terminate(), "SIGTERM");

    let watched = token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        let interrupt = recv_or_pending(interrupt);

        #[cfg(not(unix))]
        let interrupt = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = recv_or_pending(terminate);

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = watched.cancelled() => {
                tracing::debug!("Shutdown token cancelled");
                return;
            }
            _ = interrupt => {
                tracing::info!("Received Ctrl+C signal");
            },
            _ = terminate => {
                tracing::info!("Received SIGTERM signal");
            },
        }

        watched.cancel();
    });

    token
}

#[cfg(unix)]
fn install(kind: signal::unix::SignalKind, name: &'static str) -> Option<signal::unix::Signal> {
    signal::unix::signal(kind)
        .map_err(|e| tracing::error!(error = %e, signal = name, "Failed to install signal handler"))
        .ok()
}

#[cfg(unix)]
async fn recv_or_pending(stream: Option<signal::unix::Signal>) {
    match stream {
        Some(mut stream) => {
            stream.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
