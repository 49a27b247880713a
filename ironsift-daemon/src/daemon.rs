//! Engine runner.
//!
//! Builds the capture engine from the loaded configuration, starts it,
//! logs a status line every stats interval and stops the engine when the
//! shutdown future resolves. The engine is always stopped once it has
//! started, so the XDP program never outlives the daemon.

use std::future::Future;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;

use ironsift_core::config::IronsiftConfig;
use ironsift_core::pipeline::{FeatureAnalyzer, Pipeline};
use ironsift_xdp_engine::{CaptureBackend, EngineConfig, StatsSnapshot, XdpEngine};

use crate::health::DaemonStatus;

/// Run the engine until `shutdown` resolves and return the final counters.
pub async fn run(
    config: &IronsiftConfig,
    analyzer: impl FeatureAnalyzer + 'static,
    backend: CaptureBackend,
    shutdown: impl Future<Output = ()>,
) -> Result<StatsSnapshot> {
    let engine_config = EngineConfig::from_core(&config.capture);
    let interval = engine_config.stats_interval();

    let mut engine = XdpEngine::builder()
        .config(engine_config)
        .analyzer(analyzer)
        .backend(backend)
        .build()
        .context("failed to build capture engine")?;

    engine
        .start()
        .await
        .context("failed to start capture engine")?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                let health = engine.health_check().await;
                DaemonStatus::new(health, engine.report().as_ref()).log();
            }
        }
    }

    tracing::info!("shutdown signal received");
    engine.stop().await.context("failed to stop capture engine")?;
    Ok(engine.stats())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
