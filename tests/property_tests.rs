/// Property-based tests using proptest
/// Tests invariants of the cleaning stages and the quality scoring for all inputs
use proptest::prelude::*;
use rust_geo_pipeline::config::{GradeBands, GradeWeights, QualitySettings};
use rust_geo_pipeline::core::quality::{composite_score, grade_for, QualityAnalyzer};
use rust_geo_pipeline::core::transformer::{
    handle_missing_values, normalize_text_columns, remove_duplicates, NumericStrategy,
};
use rust_geo_pipeline::dataset::{ColumnKind, Dataset, Row};
use serde_json::{json, Value};
use std::collections::HashSet;

fn record(address: Option<String>, city: Option<String>, score: Option<f64>) -> Row {
    let mut row = Row::new();
    row.insert("address".into(), address.map_or(Value::Null, Value::String));
    row.insert("city".into(), city.map_or(Value::Null, Value::String));
    row.insert("score".into(), score.map_or(Value::Null, |s| json!(s)));
    row
}

fn records() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(
        (
            prop::option::of("[A-C] Rue [a-c]{1,2}"),
            prop::option::of("[ ]{0,2}[A-Za-zÉé]{1,8}[ ]{0,2}"),
            prop::option::of(0.0f64..=1.0),
        )
            .prop_map(|(address, city, score)| record(address, city, score)),
        0..30,
    )
}

fn dataset(rows: Vec<Row>) -> Dataset {
    Dataset::from_records(rows)
        .with_column_kind("score", ColumnKind::Numeric)
        .with_column_kind("address", ColumnKind::Text)
        .with_column_kind("city", ColumnKind::Text)
}

// Property: deduplication leaves unique keys, keeps first occurrences, and is idempotent
proptest! {
    #[test]
    fn dedup_leaves_unique_addresses(rows in records()) {
        let input = dataset(rows);
        let distinct: HashSet<String> = input
            .rows()
            .iter()
            .map(|r| r.get("address").map(|v| v.to_string()).unwrap_or_default())
            .collect();

        let once = remove_duplicates(input, &["address"]);
        prop_assert_eq!(once.len(), distinct.len());

        let twice = remove_duplicates(once.clone(), &["address"]);
        prop_assert_eq!(once, twice);
    }
}

// Property: missing-value handling leaves no missing cell and never changes row count
proptest! {
    #[test]
    fn missing_values_are_all_filled(rows in records(), use_mean in any::<bool>()) {
        let input = dataset(rows);
        let before = input.len();
        let strategy = if use_mean { NumericStrategy::Mean } else { NumericStrategy::Median };

        let (filled, flagged) = handle_missing_values(input, strategy, "unknown");

        prop_assert_eq!(filled.len(), before);
        for name in ["address", "city", "score"] {
            prop_assert_eq!(filled.missing_count(name), 0);
        }
        prop_assert!(flagged.is_empty() || flagged == vec!["score".to_string()]);
    }

    #[test]
    fn filled_scores_stay_in_observed_range(rows in records()) {
        let input = dataset(rows);
        let observed: Vec<f64> = input.values("score").flatten().filter_map(Value::as_f64).collect();
        prop_assume!(!observed.is_empty());
        let lo = observed.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = observed.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let (filled, _) = handle_missing_values(input, NumericStrategy::Median, "unknown");
        for score in filled.values("score").flatten().filter_map(Value::as_f64) {
            prop_assert!(score >= lo && score <= hi);
        }
    }
}

// Property: normalization is idempotent and only yields trimmed lowercase text
proptest! {
    #[test]
    fn normalization_is_idempotent(rows in records()) {
        let input = dataset(rows);
        let missing_before = input.missing_count("city");

        let once = normalize_text_columns(input, &["city"]);
        for city in once.values("city").flatten() {
            let text = city.as_str().unwrap();
            prop_assert_eq!(text, text.trim());
            prop_assert_eq!(text.to_string(), text.to_lowercase());
        }
        prop_assert_eq!(once.missing_count("city"), missing_before);

        let twice = normalize_text_columns(once.clone(), &["city"]);
        prop_assert_eq!(once, twice);
    }
}

// Property: quality metrics stay in range and analysis is repeatable
proptest! {
    #[test]
    fn quality_metrics_are_bounded(rows in records()) {
        let analyzer = QualityAnalyzer::new(dataset(rows), QualitySettings::default());
        let metrics = analyzer.analyze();

        prop_assert!((0.0..=1.0).contains(&metrics.completeness_score));
        prop_assert!((0.0..=100.0).contains(&metrics.duplicates_pct));
        prop_assert!((0.0..=1.0).contains(&metrics.geocoding_score_avg));
        prop_assert!(metrics.valid_records <= metrics.total_records);
        prop_assert_eq!(metrics, analyzer.analyze());
    }

    #[test]
    fn better_scores_never_lower_the_grade(
        completeness in 0.0f64..=1.0,
        duplicates in 0.0f64..=100.0,
        geo in 0.0f64..=1.0,
        bump in 0.0f64..=0.5,
    ) {
        let weights = GradeWeights::default();
        let bands = GradeBands::default();
        let base = grade_for(composite_score(&weights, completeness, duplicates, geo), &bands);
        let better = grade_for(
            composite_score(&weights, (completeness + bump).min(1.0), duplicates, geo),
            &bands,
        );
        // Grades order A < B < ... < F, so a better grade compares lower.
        prop_assert!(better <= base);
    }
}
