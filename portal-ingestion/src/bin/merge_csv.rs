use anyhow::{bail, Context, Result};
use portal_ingestion::{config::AppConfig, observability, transform::validate_reading, IngestionPipeline};
use std::{env, fs::File, io::BufReader};
use usage_client::{series::read_csv, ReadingsBatch};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: merge_csv <csv_file_path>");
    }
    let file_path = &args[1];

    let cfg = AppConfig::load(None)?;
    let pipeline = IngestionPipeline::from_config(&cfg, true);

    let file = File::open(file_path).with_context(|| format!("failed to open {file_path}"))?;
    let readings = read_csv(BufReader::new(file))?;
    let read = readings.len();
    let batch = ReadingsBatch::from_readings(
        readings
            .into_iter()
            .filter(|r| validate_reading(r).is_ok()),
    );
    if batch.len() < read {
        tracing::warn!(skipped = read - batch.len(), "dropped invalid or duplicate rows");
    }

    let summary = pipeline.store().merge_and_persist(&batch)?;

    tracing::info!(
        file = %file_path,
        store = %pipeline.store().path().display(),
        added = summary.added,
        replaced = summary.replaced,
        total = summary.total,
        "backfill merged"
    );
    Ok(())
}
