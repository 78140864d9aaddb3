use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use portal_ingestion::{config::AppConfig, metrics_server, observability, IngestionPipeline};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Polls a utility portal for meter readings and merges them into a local series.
#[derive(Debug, Parser)]
#[command(name = "portal-ingestion", version)]
struct Args {
    /// Run a single cycle and exit.
    #[arg(long)]
    oneshot: bool,

    /// Fetch without writing to the series store.
    #[arg(long, alias = "no_merge")]
    no_merge: bool,

    /// Forget cached account/meter ids before the first cycle.
    #[arg(long)]
    refresh_identity: bool,

    /// Config file (defaults to $PORTAL_INGEST_CONFIG, then portal-ingestion.toml).
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let args = Args::parse();

    let cfg = AppConfig::load(args.config.as_deref())?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr).await?;
    }

    let pipeline = IngestionPipeline::from_config(&cfg, !args.no_merge);
    info!(
        provider = ?cfg.provider.kind,
        store = %pipeline.store().path().display(),
        merge = !args.no_merge,
        "starting"
    );

    if args.refresh_identity {
        pipeline.refresh_identity().await?;
    }

    if args.oneshot {
        pipeline.run_cycle().await?;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_shutdown_signals(shutdown.clone()));

    pipeline.run_continuous(cfg.poll_interval(), shutdown).await?;
    Ok(())
}

async fn forward_shutdown_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received, finishing current cycle");
    shutdown.cancel();
}
