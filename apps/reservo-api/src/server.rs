//! Serving with graceful shutdown.
//!
//! ```text
//! signal ──► cancel AppState::shutdown ──► event streams end
//!        └─► supervisor.stop()          ──► in-flight POST /automation returns
//!        └─► axum drains the remaining connections
//! ```

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

use crate::routes::{router, AppState};

/// Serves the control surface until `signal` resolves.
///
/// On the signal the shutdown token is cancelled and the active run is
/// stopped before axum waits for open connections, so neither event
/// streams nor a blocked start request keep the server alive.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = state.shutdown.clone();
    let supervisor = state.supervisor.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            signal.await;
            shutdown.cancel();
            let summary = supervisor.stop().await;
            info!(
                cancelled = summary.cancelled,
                already_done = summary.already_done,
                "Shutdown: active run stopped"
            );
        })
        .await
}
