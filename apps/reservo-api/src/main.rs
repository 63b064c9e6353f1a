//! # Reservo API Server
//!
//! Loads the engine configuration, starts clock sync, and serves the control
//! surface until Ctrl+C or SIGTERM.
//!
//! ```text
//! reservo-api [CONFIG_PATH]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reservo_api::{serve, AppState};
use reservo_engine::{AutomationSupervisor, ClockSyncService, DryRunDriverFactory, EngineConfig, EventBus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,reservo_engine=debug")),
        )
        .with_target(true)
        .init();

    info!("Starting Reservo API server...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path)?;
    info!(
        stores = config.stores.len(),
        enabled = config.enabled_stores().len(),
        sync_policy = %config.session.sync_policy,
        "Configuration loaded"
    );

    // Clock sync
    let events = EventBus::default();
    let clock = ClockSyncService::from_settings(&config.clock, events.clone())?;
    clock.start(config.clock.clock_config());

    // Supervisor
    warn!("No browser backend configured, sessions use the dry-run page driver");
    let addr = config.server.bind_address();
    let supervisor = AutomationSupervisor::new(config, clock.clone(), events, Arc::new(DryRunDriverFactory));

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    serve(listener, AppState::new(supervisor.clone()), shutdown_signal()).await?;

    // Sessions were cancelled when the signal arrived; let them release
    // their drivers before exiting.
    supervisor.wait_idle().await;
    clock.stop();

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
