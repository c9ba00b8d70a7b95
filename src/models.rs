use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lookup_client::ClientStats;

// ============ Lookup Results ============

/// Outcome of geocoding one free-text address.
///
/// A zero score with no coordinates is a valid "no match" result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingResult {
    /// Normalized label returned by the geocoder.
    pub label: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Confidence score in `[0, 1]`.
    pub score: f64,
    pub city: Option<String>,
    pub postcode: Option<String>,
    /// INSEE code of the commune the address belongs to.
    pub citycode: Option<String>,
}

impl GeocodingResult {
    /// Result for an address the geocoder could not place.
    pub fn no_match(address: &str) -> Self {
        Self {
            label: address.to_string(),
            latitude: None,
            longitude: None,
            score: 0.0,
            city: None,
            postcode: None,
            citycode: None,
        }
    }

    /// True iff the score is positive and both coordinates are present.
    pub fn is_valid(&self) -> bool {
        self.score > 0.0 && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Administrative metadata of a commune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuneInfo {
    pub citycode: String,
    pub name: String,
    /// Zero when the service does not report a population.
    pub population: u64,
    pub department_code: String,
    pub region_code: String,
}

// ============ Enrichment Output ============

/// An address joined with its geocode and its commune.
///
/// Only built after both lookups succeeded, so `commune_name` is always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedAddress {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub score: f64,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub citycode: String,
    pub commune_name: String,
    pub population: u64,
}

impl EnrichedAddress {
    /// Merges a geocode with its commune.
    ///
    /// Returns `None` when the geocode is not valid.
    pub fn merge(geo: GeocodingResult, commune: CommuneInfo) -> Option<Self> {
        let (latitude, longitude) = match (geo.latitude, geo.longitude) {
            (Some(lat), Some(lon)) if geo.score > 0.0 => (lat, lon),
            _ => return None,
        };

        Some(Self {
            address: geo.label,
            latitude,
            longitude,
            score: geo.score,
            city: geo.city,
            postcode: geo.postcode,
            citycode: geo.citycode.unwrap_or(commune.citycode),
            commune_name: commune.name,
            population: commune.population,
        })
    }
}

/// Counters of one enrichment run.
///
/// Cumulative for the lifetime of the `Enricher`: two `enrich` calls on the
/// same instance add up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_addresses: u64,
    pub geocoded: u64,
    pub enriched: u64,
    pub failed: u64,
}

impl RunStats {
    /// `enriched / total_addresses`, or 0 when nothing was processed.
    pub fn success_rate(&self) -> f64 {
        if self.total_addresses == 0 {
            0.0
        } else {
            self.enriched as f64 / self.total_addresses as f64
        }
    }
}

/// Run counters plus the request counters of both lookup clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentStats {
    #[serde(flatten)]
    pub run: RunStats,
    pub success_rate: f64,
    pub geocoder_stats: ClientStats,
    pub commune_stats: ClientStats,
}

// ============ Quality ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
    F,
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            QualityGrade::A => "A",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
            QualityGrade::F => "F",
        };
        f.write_str(letter)
    }
}

/// Quality verdict on a cleaned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_records: usize,
    /// Rows with both coordinates present.
    pub valid_records: usize,
    /// Fraction of populated required cells, in `[0, 1]`.
    pub completeness_score: f64,
    /// Share of rows whose address also appears on another row, in `[0, 100]`.
    pub duplicates_pct: f64,
    pub geocoding_score_avg: f64,
    pub quality_grade: QualityGrade,
    pub is_acceptable: bool,
}
