use anyhow::Context;
use rust_geo_pipeline::config::Config;
use rust_geo_pipeline::enrichment::Enricher;
use rust_geo_pipeline::pipeline::run_pipeline;
use rust_geo_pipeline::storage::SnapshotStore;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// One address per line; blank lines are skipped.
fn read_addresses(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading address file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Main entry point for the pipeline.
///
/// Initializes tracing and configuration, creates the data directories, then
/// enriches the addresses listed in the file given as first argument.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_geo_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let input = std::env::args()
        .nth(1)
        .context("usage: rust-geo-pipeline <addresses.txt>")?;

    let config = Config::from_env()?;
    config
        .paths
        .ensure_dirs()
        .context("creating data directories")?;

    let addresses = read_addresses(Path::new(&input))?;
    tracing::info!("Loaded {} addresses from {}", addresses.len(), input);

    let enricher = Enricher::from_config(&config)?;
    let store = SnapshotStore::new(config.paths.clone());

    let summary = run_pipeline(&addresses, &config, enricher, &store).await?;

    tracing::info!(
        "Enriched {} of {} addresses ({:.1}% success)",
        summary.enrichment.run.enriched,
        summary.enrichment.run.total_addresses,
        summary.enrichment.success_rate * 100.0
    );
    tracing::info!(
        "Geocoder: {} requests, {} errors; communes: {} requests, {} errors",
        summary.enrichment.geocoder_stats.requests_made,
        summary.enrichment.geocoder_stats.errors,
        summary.enrichment.commune_stats.requests_made,
        summary.enrichment.commune_stats.errors
    );
    tracing::info!(
        "Quality grade {} (acceptable: {})",
        summary.quality.quality_grade,
        summary.quality.is_acceptable
    );
    tracing::info!("Dataset: {}", summary.output_path.display());
    tracing::info!("Report: {}", summary.report_path.display());

    Ok(())
}
