//! Foreground monitor daemon
//!
//! This module implements the long-running monitor that:
//! - Loads the configuration and the device registry
//! - Optionally scans the local host's ports once on startup
//! - Probes every enabled device on its own interval
//! - Re-reads the registry periodically so edits from other commands apply
//! - Handles graceful shutdown via Ctrl+C, SIGTERM and SIGINT

use anyhow::Result;
use nettools_core::config;
use nettools_core::metrics::LogSink;
use nettools_core::scanner::privileges;
use nettools_core::service::{MONITOR_SYNC_INTERVAL, NetTools};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run the monitor until a shutdown signal arrives
pub async fn run_daemon(foreground: bool) -> Result<()> {
    if !foreground {
        // Always foreground; background operation is left to systemd
        tracing::info!("Running in foreground mode. Use systemd to run as a background service.");
    }

    let config = config::load_config()?;
    tracing::info!(
        "Starting monitor (config from {}, default interval {}s, {} retries)",
        config.source,
        config.ping_interval_secs,
        config.retries
    );

    let capabilities = privileges::detect_capabilities().await;
    if capabilities.is_limited() {
        tracing::warn!("{}", capabilities.summary());
    }

    let tools = NetTools::open(config, Arc::new(LogSink))?;

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    tokio::select! {
        report = tools.startup_scan() => {
            if let Some(report) = report {
                tracing::info!("Startup scan of localhost: {}", report.state_value());
            }
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested during startup scan");
            tools.shutdown().await;
            return Ok(());
        }
    }

    let monitored = tools.start_monitor().await?;
    if monitored == 0 {
        tracing::warn!("No enabled devices. Run 'nettools discover' or 'nettools add' first.");
    }

    // Picks up devices added, edited or deleted by other nettools commands
    let mut sync = tokio::time::interval(MONITOR_SYNC_INTERVAL);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sync.tick().await;

    loop {
        tokio::select! {
            _ = sync.tick() => {
                match tools.sync_monitor().await {
                    Ok((monitored, _)) => tracing::debug!("Registry synced, {} devices", monitored),
                    Err(e) => tracing::error!("Failed to reload device registry: {}", e),
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, stopping monitor");
                break;
            }
        }
    }

    tools.shutdown().await;
    tracing::info!("Monitor stopped");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C, SIGTERM or SIGINT
fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        tracing::info!("Received {}", name);
                        shutdown.cancel();
                    });
                }
                Err(e) => tracing::warn!("Failed to register {} handler: {}", name, e),
            }
        }
    }

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C");
        shutdown.cancel();
    });
}
