use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

use lib_beacon::{BeaconClient, BeaconRegistry, QueryDispatcher};

mod bob_logic;
use bob_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;

    // Any configuration error is fatal: the server never starts with a partial registry.
    let beacon_dir = settings.beacon_dir();
    let registry = BeaconRegistry::from_config_dir(&beacon_dir)
        .with_context(|| format!("failed to load beacons from {}", beacon_dir.display()))?;
    for name in registry.names() {
        log::info!("Beacon '{}' registered", name);
    }

    let client = BeaconClient::new(settings.request_timeout).context("failed to build HTTP client")?;
    let mut dispatcher = QueryDispatcher::new(Arc::new(registry), client);
    if let Some(limit) = settings.max_in_flight {
        dispatcher = dispatcher.with_max_in_flight(limit);
    }
    let app_state = state::AppState::new(dispatcher, settings.timeout);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let mut downstream_handle = tokio::spawn(downstream::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal, or for the server to stop on its own
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Unable to listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        finished = &mut downstream_handle => {
            // Bind or TLS failures end the server before any signal arrives.
            finished??;
            log::warn!("Downstream server stopped on its own.");
            return Ok(());
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    downstream_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}
