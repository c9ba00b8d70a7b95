//! Cleaning stages applied to the enriched table.
//!
//! Each stage is a pure function from one `Dataset` to the next. `Transformer`
//! chains them and keeps an ordered log of what ran. Stage order matters and is
//! the caller's choice: deduplicate before filling, normalize after filling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::dataset::{is_missing, ColumnKind, Dataset};
use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericStrategy {
    Median,
    Mean,
}

impl FromStr for NumericStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "median" => Ok(NumericStrategy::Median),
            "mean" => Ok(NumericStrategy::Mean),
            other => Err(PipelineError::Config(format!(
                "Unknown numeric strategy '{}', expected 'median' or 'mean'",
                other
            ))),
        }
    }
}

impl fmt::Display for NumericStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericStrategy::Median => f.write_str("median"),
            NumericStrategy::Mean => f.write_str("mean"),
        }
    }
}

/// One cleaning stage with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum TransformStage {
    RemoveDuplicates {
        columns: Vec<String>,
    },
    HandleMissingValues {
        numeric_strategy: NumericStrategy,
        text_fill: String,
    },
    NormalizeTextColumns {
        columns: Vec<String>,
    },
}

impl TransformStage {
    /// Dedupe on address, median/"unknown" fill, then lower-case city and commune.
    pub fn default_cleaning() -> Vec<TransformStage> {
        vec![
            TransformStage::RemoveDuplicates {
                columns: vec!["address".to_string()],
            },
            TransformStage::HandleMissingValues {
                numeric_strategy: NumericStrategy::Median,
                text_fill: "unknown".to_string(),
            },
            TransformStage::NormalizeTextColumns {
                columns: vec!["city".to_string(), "commune_name".to_string()],
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformStage::RemoveDuplicates { .. } => "remove_duplicates",
            TransformStage::HandleMissingValues { .. } => "handle_missing_values",
            TransformStage::NormalizeTextColumns { .. } => "normalize_text_columns",
        }
    }

    fn detail(&self) -> String {
        match self {
            TransformStage::RemoveDuplicates { columns } => {
                format!("subset=[{}]", columns.join(", "))
            }
            TransformStage::HandleMissingValues {
                numeric_strategy,
                text_fill,
            } => format!("numeric={}, text='{}'", numeric_strategy, text_fill),
            TransformStage::NormalizeTextColumns { columns } => {
                format!("columns=[{}]", columns.join(", "))
            }
        }
    }
}

/// Log line for one applied stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationEntry {
    pub stage: String,
    pub detail: String,
    pub rows_before: usize,
    pub rows_after: usize,
    /// Numeric columns with no value at all, filled with 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flagged_columns: Vec<String>,
}

// ============ Stages ============

/// Drops rows equal to an earlier row on every column of `columns`.
///
/// Two missing cells compare equal. The first occurrence is kept, in row order.
pub fn remove_duplicates(dataset: Dataset, columns: &[&str]) -> Dataset {
    let (schema, rows) = dataset.into_parts();
    let mut seen: HashSet<Vec<String>> = HashSet::with_capacity(rows.len());

    let rows = rows
        .into_iter()
        .filter(|row| {
            let key = columns
                .iter()
                .map(|name| match row.get(*name) {
                    Some(value) if !value.is_null() => value.to_string(),
                    _ => String::from("null"),
                })
                .collect::<Vec<_>>();
            seen.insert(key)
        })
        .collect();

    Dataset::new(schema, rows)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Fills missing cells column by column.
///
/// Numeric columns get the median or mean of their present values; text
/// columns get `text_fill` verbatim. A numeric column with no value at all is
/// filled with 0 and returned in the flagged list.
pub fn handle_missing_values(
    dataset: Dataset,
    strategy: NumericStrategy,
    text_fill: &str,
) -> (Dataset, Vec<String>) {
    let mut flagged = Vec::new();

    let fills: Vec<(String, Value)> = dataset
        .columns()
        .iter()
        .map(|column| {
            let fill = match column.kind {
                ColumnKind::Text => Value::String(text_fill.to_string()),
                ColumnKind::Numeric => {
                    let mut present: Vec<f64> = dataset
                        .values(&column.name)
                        .flatten()
                        .filter_map(Value::as_f64)
                        .collect();
                    let statistic = match strategy {
                        NumericStrategy::Median => median(&mut present),
                        NumericStrategy::Mean => mean(&present),
                    };
                    match statistic {
                        Some(value) => Value::from(value),
                        None => {
                            tracing::warn!(
                                "Column '{}' has no values, filling with 0",
                                column.name
                            );
                            flagged.push(column.name.clone());
                            Value::from(0.0)
                        }
                    }
                }
            };
            (column.name.clone(), fill)
        })
        .collect();

    let (schema, mut rows) = dataset.into_parts();
    for row in rows.iter_mut() {
        for (name, fill) in &fills {
            if is_missing(row.get(name)) {
                row.insert(name.clone(), fill.clone());
            }
        }
    }

    (Dataset::new(schema, rows), flagged)
}

/// Trims and lower-cases string cells of the named columns.
///
/// Missing cells and non-string values are left as they are.
pub fn normalize_text_columns(dataset: Dataset, columns: &[&str]) -> Dataset {
    let (schema, mut rows) = dataset.into_parts();
    for row in rows.iter_mut() {
        for name in columns {
            if let Some(Value::String(text)) = row.get_mut(*name) {
                *text = text.trim().to_lowercase();
            }
        }
    }
    Dataset::new(schema, rows)
}

// ============ Pipeline ============

/// Chains cleaning stages over an owned dataset.
///
/// Every method consumes the transformer and returns the next one, so no
/// earlier state stays reachable once a stage has run.
#[derive(Debug, Clone)]
pub struct Transformer {
    dataset: Dataset,
    log: Vec<TransformationEntry>,
}

impl Transformer {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            log: Vec::new(),
        }
    }

    pub fn remove_duplicates(self, columns: &[&str]) -> Self {
        self.apply(&TransformStage::RemoveDuplicates {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn handle_missing_values(self, numeric_strategy: NumericStrategy, text_fill: &str) -> Self {
        self.apply(&TransformStage::HandleMissingValues {
            numeric_strategy,
            text_fill: text_fill.to_string(),
        })
    }

    pub fn normalize_text_columns(self, columns: &[&str]) -> Self {
        self.apply(&TransformStage::NormalizeTextColumns {
            columns: columns.iter().map(|c| c.to_string()).collect(),
        })
    }

    /// Runs the stages in order.
    pub fn run(self, stages: &[TransformStage]) -> Self {
        stages.iter().fold(self, |transformer, stage| transformer.apply(stage))
    }

    pub fn apply(self, stage: &TransformStage) -> Self {
        let Self { dataset, mut log } = self;
        let rows_before = dataset.len();
        let mut flagged_columns = Vec::new();

        let dataset = match stage {
            TransformStage::RemoveDuplicates { columns } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                remove_duplicates(dataset, &columns)
            }
            TransformStage::HandleMissingValues {
                numeric_strategy,
                text_fill,
            } => {
                let (dataset, flagged) =
                    handle_missing_values(dataset, *numeric_strategy, text_fill);
                flagged_columns = flagged;
                dataset
            }
            TransformStage::NormalizeTextColumns { columns } => {
                let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
                normalize_text_columns(dataset, &columns)
            }
        };

        let entry = TransformationEntry {
            stage: stage.name().to_string(),
            detail: stage.detail(),
            rows_before,
            rows_after: dataset.len(),
            flagged_columns,
        };
        tracing::info!(
            "Applied {} ({}): {} -> {} rows",
            entry.stage,
            entry.detail,
            entry.rows_before,
            entry.rows_after
        );
        log.push(entry);

        Self { dataset, log }
    }

    /// Current working dataset. The log is kept.
    pub fn result(&self) -> &Dataset {
        &self.dataset
    }

    pub fn transformations(&self) -> &[TransformationEntry] {
        &self.log
    }

    pub fn into_parts(self) -> (Dataset, Vec<TransformationEntry>) {
        (self.dataset, self.log)
    }
}
