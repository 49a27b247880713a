use anyhow::{Context, Result};
use clap::Parser;

use ironsift_core::config::IronsiftConfig;
use ironsift_daemon::analyzer::EntropyAnalyzer;
use ironsift_daemon::cli::DaemonCli;
use ironsift_daemon::{daemon, logging, metrics_server};
use ironsift_xdp_engine::CaptureBackend;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = IronsiftConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        interface = config.capture.interface.as_str(),
        "ironsift-daemon starting"
    );

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    let analyzer = EntropyAnalyzer::new(cli.entropy_threshold);
    let totals = daemon::run(
        &config,
        analyzer,
        CaptureBackend::Kernel,
        daemon::shutdown_signal(),
    )
    .await?;

    tracing::info!(
        total = totals.total,
        redirected = totals.redirected,
        dropped = totals.dropped,
        predictions = totals.ml_predictions,
        "ironsift-daemon shut down"
    );
    Ok(())
}
