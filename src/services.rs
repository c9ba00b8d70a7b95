use crate::clock::Clock;
use crate::config::LookupConfig;
use crate::errors::PipelineError;
use crate::lookup_client::{ClientStats, RateLimitedClient};
use crate::models::{CommuneInfo, GeocodingResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};

// ============ API Adresse (BAN) ============

#[derive(Debug, Deserialize)]
pub struct BanFeatureCollection {
    pub features: Vec<BanFeature>,
}

#[derive(Debug, Deserialize)]
pub struct BanFeature {
    pub properties: BanProperties,
    pub geometry: Option<BanGeometry>,
}

#[derive(Debug, Deserialize)]
pub struct BanProperties {
    pub label: String,
    pub score: f64,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub citycode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BanGeometry {
    /// GeoJSON order: `[longitude, latitude]`.
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

impl BanFeature {
    fn into_result(self) -> GeocodingResult {
        let (latitude, longitude) = match self.geometry.as_ref().map(|g| g.coordinates.as_slice()) {
            Some([lon, lat, ..]) => (Some(*lat), Some(*lon)),
            _ => (None, None),
        };

        GeocodingResult {
            label: self.properties.label,
            latitude,
            longitude,
            score: self.properties.score,
            city: self.properties.city,
            postcode: self.properties.postcode,
            citycode: self.properties.citycode,
        }
    }
}

/// Resolves free-text addresses through the BAN `/search` endpoint.
pub struct AddressGeocoder {
    client: RateLimitedClient,
}

impl AddressGeocoder {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: LookupConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        Ok(Self::new(RateLimitedClient::new(config, clock)?))
    }

    /// Geocode one address, keeping only the best-ranked candidate.
    ///
    /// Blank input, an empty `features` array and a 404 all yield a zero-score
    /// result without coordinates. Only the first of those skips the network.
    pub async fn fetch_one(&mut self, address: &str) -> Result<GeocodingResult, PipelineError> {
        let query = address.trim();
        if query.is_empty() {
            return Ok(GeocodingResult::no_match(address));
        }

        let Some(data) = self
            .client
            .fetch("/search", &[("q", query), ("limit", "1")])
            .await?
        else {
            tracing::debug!("Geocoder: no result for '{}'", query);
            return Ok(GeocodingResult::no_match(address));
        };

        let collection: BanFeatureCollection = match serde_json::from_value(data) {
            Ok(collection) => collection,
            Err(e) => {
                self.client.record_error();
                return Err(PipelineError::malformed(self.client.name(), e.to_string()));
            }
        };

        let Some(feature) = collection.features.into_iter().next() else {
            tracing::debug!("Geocoder: no candidate for '{}'", query);
            return Ok(GeocodingResult::no_match(address));
        };

        self.client.record_item();
        let result = feature.into_result();
        tracing::debug!(
            "Geocoder: '{}' -> '{}' (score {:.2})",
            query,
            result.label,
            result.score
        );
        Ok(result)
    }

    pub fn stats(&self) -> ClientStats {
        self.client.stats()
    }
}

// ============ Geo API Gouv (communes) ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunePayload {
    pub code: String,
    pub nom: String,
    pub population: Option<u64>,
    pub code_departement: String,
    pub code_region: String,
}

impl From<CommunePayload> for CommuneInfo {
    fn from(payload: CommunePayload) -> Self {
        Self {
            citycode: payload.code,
            name: payload.nom,
            population: payload.population.unwrap_or(0),
            department_code: payload.code_departement,
            region_code: payload.code_region,
        }
    }
}

/// Five-character INSEE code; Corsica uses `2A`/`2B` as department prefix.
fn insee_code_regex() -> &'static Regex {
    static INSEE_CODE: OnceLock<Regex> = OnceLock::new();
    INSEE_CODE.get_or_init(|| Regex::new(r"^(?:\d{5}|2[AB]\d{3})$").expect("static regex"))
}

pub fn is_valid_citycode(citycode: &str) -> bool {
    insee_code_regex().is_match(citycode)
}

/// Looks up commune metadata by INSEE code.
pub struct CommuneResolver {
    client: RateLimitedClient,
}

impl CommuneResolver {
    pub fn new(client: RateLimitedClient) -> Self {
        Self { client }
    }

    pub fn from_config(config: LookupConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        Ok(Self::new(RateLimitedClient::new(config, clock)?))
    }

    /// Fetch one commune.
    ///
    /// Returns `Ok(None)` for an empty or malformed code (no request is made)
    /// and when the service answers 404. A payload with a blank name is
    /// malformed.
    pub async fn fetch_one(&mut self, citycode: &str) -> Result<Option<CommuneInfo>, PipelineError> {
        let citycode = citycode.trim();
        if citycode.is_empty() {
            return Ok(None);
        }
        if !is_valid_citycode(citycode) {
            tracing::warn!("Skipping commune lookup for invalid INSEE code: {}", citycode);
            return Ok(None);
        }

        let endpoint = format!("/communes/{}", citycode);
        let Some(data) = self
            .client
            .fetch(
                &endpoint,
                &[("fields", "code,nom,population,codeDepartement,codeRegion")],
            )
            .await?
        else {
            tracing::debug!("Commune {} not found", citycode);
            return Ok(None);
        };

        let payload: CommunePayload = match serde_json::from_value(data) {
            Ok(payload) => payload,
            Err(e) => {
                self.client.record_error();
                return Err(PipelineError::malformed(self.client.name(), e.to_string()));
            }
        };
        if payload.nom.trim().is_empty() {
            self.client.record_error();
            return Err(PipelineError::malformed(
                self.client.name(),
                format!("commune {} has an empty name", citycode),
            ));
        }

        self.client.record_item();
        Ok(Some(payload.into()))
    }

    pub fn stats(&self) -> ClientStats {
        self.client.stats()
    }
}
