//! End-to-end run: enrich, snapshot, clean, score, persist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Config;
use crate::dataset::Dataset;
use crate::enrichment::Enricher;
use crate::errors::{PipelineError, ResultExt};
use crate::models::{EnrichmentStats, QualityMetrics};
use crate::quality::QualityAnalyzer;
use crate::storage::SnapshotStore;
use crate::transformer::{TransformStage, TransformationEntry, Transformer};

pub const RAW_SNAPSHOT_NAME: &str = "geo_enriched_raw";
pub const DATASET_NAME: &str = "geo_dataset";

/// What one pipeline run did and where it left its files.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub enrichment: EnrichmentStats,
    pub transformations: Vec<TransformationEntry>,
    pub quality: QualityMetrics,
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    pub report_path: PathBuf,
}

/// Runs the whole pipeline over `addresses`.
///
/// At most `config.max_items` addresses are processed, in order, in chunks of
/// `config.batch_size`. Fails with `EmptyEnrichment` before writing anything
/// when no address could be enriched.
pub async fn run_pipeline(
    addresses: &[String],
    config: &Config,
    mut enricher: Enricher,
    store: &SnapshotStore,
) -> Result<PipelineSummary, PipelineError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let selected = &addresses[..addresses.len().min(config.max_items)];
    tracing::info!(
        "Pipeline run {} started: {} addresses ({} received)",
        run_id,
        selected.len(),
        addresses.len()
    );

    // Stage 1: enrichment
    let batch_size = if config.batch_size == 0 {
        selected.len().max(1)
    } else {
        config.batch_size
    };
    let mut enriched = Vec::with_capacity(selected.len());
    for (idx, batch) in selected.chunks(batch_size).enumerate() {
        tracing::debug!("Batch {}: {} addresses", idx + 1, batch.len());
        enriched.extend(enricher.enrich(batch).await);
    }
    let enrichment = enricher.get_stats();

    if enriched.is_empty() {
        tracing::error!("No address could be enriched, aborting run {}", run_id);
        return Err(PipelineError::EmptyEnrichment);
    }

    let raw_path = store
        .save_raw_json(&enriched, RAW_SNAPSHOT_NAME)
        .context("saving raw snapshot")?;

    // Stage 2: cleaning
    let (clean, transformations) = Transformer::new(Dataset::from_enriched(enriched))
        .run(&TransformStage::default_cleaning())
        .into_parts();
    tracing::info!(
        "Cleaning done: {} rows after {} stages",
        clean.len(),
        transformations.len()
    );

    // Stage 3: quality
    let analyzer = QualityAnalyzer::new(clean, config.quality);
    let (report, report_path) = analyzer
        .generate_report(DATASET_NAME, store)
        .context("writing quality report")?;
    let quality = report.metrics;
    tracing::info!(
        "Quality: grade {}, completeness {:.1}%, duplicates {:.1}%",
        quality.quality_grade,
        quality.completeness_score * 100.0,
        quality.duplicates_pct
    );

    // Stage 4: final dataset
    let output_path = store
        .save_processed_json(analyzer.dataset(), DATASET_NAME)
        .context("saving processed dataset")?;

    let finished_at = Utc::now();
    let duration_seconds = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
    tracing::info!(
        "Pipeline run {} finished in {:.1}s: {} addresses enriched, grade {}",
        run_id,
        duration_seconds,
        analyzer.dataset().len(),
        quality.quality_grade
    );

    Ok(PipelineSummary {
        run_id,
        started_at,
        finished_at,
        duration_seconds,
        enrichment,
        transformations,
        quality,
        raw_path,
        output_path,
        report_path,
    })
}
