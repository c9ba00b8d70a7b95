//! Dataset quality scoring.
//!
//! Metrics are computed from the dataset handed to the analyzer at
//! construction; `analyze` is a pure function of that snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::config::{GradeBands, GradeWeights, QualitySettings, QualityThresholds};
use crate::dataset::Dataset;
use crate::errors::PipelineError;
use crate::models::{QualityGrade, QualityMetrics};
use crate::storage::SnapshotStore;

/// Columns that count towards completeness.
pub const REQUIRED_COLUMNS: [&str; 4] = ["address", "latitude", "longitude", "city"];

/// Weighted blend of completeness, uniqueness and geocoding confidence, in `[0, 1]`.
pub fn composite_score(
    weights: &GradeWeights,
    completeness: f64,
    duplicates_pct: f64,
    geocoding_score_avg: f64,
) -> f64 {
    let total = weights.completeness + weights.uniqueness + weights.geocoding;
    if total <= 0.0 {
        return 0.0;
    }
    let uniqueness = (1.0 - duplicates_pct / 100.0).clamp(0.0, 1.0);
    let weighted = weights.completeness * completeness
        + weights.uniqueness * uniqueness
        + weights.geocoding * geocoding_score_avg;
    (weighted / total).clamp(0.0, 1.0)
}

pub fn grade_for(composite: f64, bands: &GradeBands) -> QualityGrade {
    if composite >= bands.a {
        QualityGrade::A
    } else if composite >= bands.b {
        QualityGrade::B
    } else if composite >= bands.c {
        QualityGrade::C
    } else if composite >= bands.d {
        QualityGrade::D
    } else {
        QualityGrade::F
    }
}

pub fn meets_thresholds(
    thresholds: &QualityThresholds,
    completeness: f64,
    duplicates_pct: f64,
    geocoding_score_avg: f64,
) -> bool {
    completeness >= thresholds.completeness_min
        && duplicates_pct <= thresholds.duplicates_max_pct
        && geocoding_score_avg >= thresholds.geocoding_score_min
}

/// Audit document written next to the processed dataset.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub name: String,
    pub generated_at: DateTime<Utc>,
    /// SHA-256 of the analyzed rows, hex encoded.
    pub dataset_sha256: String,
    pub metrics: QualityMetrics,
    pub composite_score: f64,
    pub thresholds: QualityThresholds,
    pub bands: GradeBands,
    pub missing_by_column: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
}

pub struct QualityAnalyzer {
    dataset: Dataset,
    settings: QualitySettings,
}

impl QualityAnalyzer {
    pub fn new(dataset: Dataset, settings: QualitySettings) -> Self {
        Self { dataset, settings }
    }

    pub fn with_defaults(dataset: Dataset) -> Self {
        Self::new(dataset, QualitySettings::default())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn analyze(&self) -> QualityMetrics {
        let total_records = self.dataset.len();
        if total_records == 0 {
            return QualityMetrics {
                total_records: 0,
                valid_records: 0,
                completeness_score: 0.0,
                duplicates_pct: 0.0,
                geocoding_score_avg: 0.0,
                quality_grade: QualityGrade::F,
                is_acceptable: false,
            };
        }

        let completeness_score = self.completeness();
        let duplicates_pct = self.duplicates_pct();
        let geocoding_score_avg = self.geocoding_score_avg();
        let composite = composite_score(
            &self.settings.weights,
            completeness_score,
            duplicates_pct,
            geocoding_score_avg,
        );

        QualityMetrics {
            total_records,
            valid_records: self.valid_records(),
            completeness_score,
            duplicates_pct,
            geocoding_score_avg,
            quality_grade: grade_for(composite, &self.settings.bands),
            is_acceptable: meets_thresholds(
                &self.settings.thresholds,
                completeness_score,
                duplicates_pct,
                geocoding_score_avg,
            ),
        }
    }

    fn valid_records(&self) -> usize {
        self.dataset
            .values("latitude")
            .zip(self.dataset.values("longitude"))
            .filter(|(lat, lon)| lat.is_some() && lon.is_some())
            .count()
    }

    fn completeness(&self) -> f64 {
        let cells = self.dataset.len() * REQUIRED_COLUMNS.len();
        if cells == 0 {
            return 0.0;
        }
        let missing: usize = REQUIRED_COLUMNS
            .iter()
            .map(|name| self.dataset.missing_count(name))
            .sum();
        (cells - missing) as f64 / cells as f64
    }

    /// Percentage of rows whose address is shared with at least one other row.
    fn duplicates_pct(&self) -> f64 {
        let total = self.dataset.len();
        if total == 0 {
            return 0.0;
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for value in self.dataset.values("address").flatten() {
            *counts.entry(value.to_string()).or_insert(0) += 1;
        }
        let duplicated: usize = counts.values().filter(|&&n| n > 1).sum();

        100.0 * duplicated as f64 / total as f64
    }

    fn geocoding_score_avg(&self) -> f64 {
        let scores: Vec<f64> = self
            .dataset
            .values("score")
            .flatten()
            .filter_map(|v| v.as_f64())
            .collect();
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }

    fn fingerprint(&self) -> String {
        let serialized = serde_json::to_string(self.dataset.rows()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn recommendations(&self, metrics: &QualityMetrics) -> Vec<String> {
        let thresholds = &self.settings.thresholds;
        let mut recommendations = Vec::new();

        if metrics.total_records == 0 {
            recommendations.push("Dataset is empty; check the enrichment stage".to_string());
            return recommendations;
        }
        if metrics.completeness_score < thresholds.completeness_min {
            recommendations.push(format!(
                "Completeness {:.1}% is below the {:.1}% minimum; review missing required fields",
                metrics.completeness_score * 100.0,
                thresholds.completeness_min * 100.0
            ));
        }
        if metrics.duplicates_pct > thresholds.duplicates_max_pct {
            recommendations.push(format!(
                "Duplicates {:.1}% exceed the {:.1}% maximum; deduplicate on address",
                metrics.duplicates_pct, thresholds.duplicates_max_pct
            ));
        }
        if metrics.geocoding_score_avg < thresholds.geocoding_score_min {
            recommendations.push(format!(
                "Mean geocoding score {:.2} is below {:.2}; inspect low-confidence addresses",
                metrics.geocoding_score_avg, thresholds.geocoding_score_min
            ));
        }
        if metrics.valid_records < metrics.total_records {
            recommendations.push(format!(
                "{} record(s) lack coordinates",
                metrics.total_records - metrics.valid_records
            ));
        }
        recommendations
    }

    /// Builds the audit report without writing it.
    pub fn build_report(&self, name: &str) -> QualityReport {
        let metrics = self.analyze();
        let composite = composite_score(
            &self.settings.weights,
            metrics.completeness_score,
            metrics.duplicates_pct,
            metrics.geocoding_score_avg,
        );
        let missing_by_column = self
            .dataset
            .columns()
            .iter()
            .map(|c| (c.name.clone(), self.dataset.missing_count(&c.name)))
            .collect();

        QualityReport {
            name: name.to_string(),
            generated_at: Utc::now(),
            dataset_sha256: self.fingerprint(),
            recommendations: self.recommendations(&metrics),
            metrics,
            composite_score: composite,
            thresholds: self.settings.thresholds,
            bands: self.settings.bands,
            missing_by_column,
        }
    }

    /// Builds the report and writes it to the reports directory.
    pub fn generate_report(
        &self,
        name: &str,
        store: &SnapshotStore,
    ) -> Result<(QualityReport, PathBuf), PipelineError> {
        let report = self.build_report(name);
        let path = store.save_report(&report, name)?;
        tracing::info!(
            "Quality report '{}' written to {} (grade {})",
            name,
            path.display(),
            report.metrics.quality_grade
        );
        Ok((report, path))
    }
}
