use anyhow::{bail, Result};
use portal_ingestion::{config::AppConfig, observability, IngestionPipeline};
use std::{env, path::PathBuf};
use time::OffsetDateTime;
use usage_client::series::{export_file_name, write_atomic};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: export_window <target_dir>");
    }
    let target_dir = PathBuf::from(&args[1]);

    // Same config resolution as the service (PORTAL_INGEST_CONFIG or ./portal-ingestion.toml).
    let cfg = AppConfig::load(None)?;
    let pipeline = IngestionPipeline::from_config(&cfg, false);

    let batch = pipeline.fetch_window().await?;
    if batch.is_empty() {
        bail!("provider returned no readings");
    }

    let path = target_dir.join(export_file_name(
        &cfg.provider.username,
        OffsetDateTime::now_utc(),
    ));
    write_atomic(&path, batch.as_slice())?;

    tracing::info!(path = %path.display(), rows = batch.len(), "window exported");
    Ok(())
}
