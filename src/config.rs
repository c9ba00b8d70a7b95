use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::PipelineError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Connection settings for one remote lookup service.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Display name used in logs and stats.
    pub name: String,
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Minimum spacing between two requests issued by the same client.
    pub min_request_interval: Duration,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
}

impl LookupConfig {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(10),
            min_request_interval: Duration::from_millis(100),
            headers: BTreeMap::new(),
        }
    }

    /// API Adresse (Base Adresse Nationale) defaults.
    pub fn adresse() -> Self {
        Self::new("API Adresse (BAN)", "https://api-adresse.data.gouv.fr")
    }

    /// geo.api.gouv.fr communes defaults.
    pub fn commune() -> Self {
        Self::new("Geo API Gouv - Communes", "https://geo.api.gouv.fr")
    }
}

/// Caller-side retry policy for transient lookup failures.
///
/// `max_retries = 0` disables retries entirely. Backoff delays are whole
/// seconds: `initial_backoff` must be at least 1s and `max_backoff` at least
/// `initial_backoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.initial_backoff.as_secs() == 0 {
            return Err(PipelineError::Config(format!(
                "retry initial backoff must be at least 1s, got {:?}",
                self.initial_backoff
            )));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(PipelineError::Config(format!(
                "retry max backoff {:?} is below initial backoff {:?}",
                self.max_backoff, self.initial_backoff
            )));
        }
        Ok(())
    }
}

/// Acceptance thresholds for a cleaned dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum fraction of populated required cells.
    pub completeness_min: f64,
    /// Minimum mean geocoding confidence.
    pub geocoding_score_min: f64,
    /// Maximum share of duplicated addresses, in percent.
    pub duplicates_max_pct: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            completeness_min: 0.7,
            geocoding_score_min: 0.5,
            duplicates_max_pct: 5.0,
        }
    }
}

/// Lower bounds of the composite score for grades A to D; anything below `d` is F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeBands {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeBands {
    fn default() -> Self {
        Self {
            a: 0.9,
            b: 0.8,
            c: 0.7,
            d: 0.6,
        }
    }
}

impl QualityThresholds {
    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.completeness_min) {
            anyhow::bail!("QUALITY_COMPLETENESS_MIN must lie within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.geocoding_score_min) {
            anyhow::bail!("QUALITY_GEOCODING_SCORE_MIN must lie within [0, 1]");
        }
        if !(0.0..=100.0).contains(&self.duplicates_max_pct) {
            anyhow::bail!("QUALITY_DUPLICATES_MAX_PCT must lie within [0, 100]");
        }
        Ok(())
    }
}

impl GradeBands {
    fn validate(&self) -> anyhow::Result<()> {
        let edges = [self.a, self.b, self.c, self.d];
        if edges.iter().any(|e| !(0.0..=1.0).contains(e)) {
            anyhow::bail!("grade bands must lie within [0, 1]");
        }
        if !edges.windows(2).all(|w| w[0] >= w[1]) {
            anyhow::bail!("grade bands must be non-increasing from A to D");
        }
        Ok(())
    }
}

impl FromStr for GradeBands {
    type Err = anyhow::Error;

    /// Parses `"a,b,c,d"`, e.g. `"0.9,0.8,0.7,0.6"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let edges = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("invalid grade band value: {}", e))?;
        let [a, b, c, d] = edges[..] else {
            anyhow::bail!("expected 4 grade bands, got {}", edges.len());
        };
        let bands = Self { a, b, c, d };
        bands.validate()?;
        Ok(bands)
    }
}

/// Weights of the composite score behind the letter grade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeWeights {
    pub completeness: f64,
    /// Applied to `1 - duplicates_pct / 100`.
    pub uniqueness: f64,
    pub geocoding: f64,
}

impl Default for GradeWeights {
    fn default() -> Self {
        Self {
            completeness: 0.4,
            uniqueness: 0.3,
            geocoding: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualitySettings {
    pub thresholds: QualityThresholds,
    pub bands: GradeBands,
    pub weights: GradeWeights,
}

/// Output directory layout.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl DataPaths {
    pub fn under(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            raw_dir: data_dir.join("raw"),
            processed_dir: data_dir.join("processed"),
            reports_dir: data_dir.join("reports"),
        }
    }

    /// Creates the output directories. Called once at process startup.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.raw_dir, &self.processed_dir, &self.reports_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::under("data")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub adresse: LookupConfig,
    pub commune: LookupConfig,
    /// Upper bound on the number of addresses processed per run.
    pub max_items: usize,
    pub batch_size: usize,
    /// Log a progress line every N addresses.
    pub progress_every: usize,
    pub retry: RetryPolicy,
    pub quality: QualitySettings,
    pub paths: DataPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adresse: LookupConfig::adresse(),
            commune: LookupConfig::commune(),
            max_items: 200,
            batch_size: 20,
            progress_every: 25,
            retry: RetryPolicy::default(),
            quality: QualitySettings::default(),
            paths: DataPaths::default(),
        }
    }
}

/// Reads and parses an optional environment variable.
fn env_parse<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        Err(_) => Ok(None),
    }
}

fn validate_base_url(name: &str, value: String) -> anyhow::Result<String> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    url::Url::parse(&value).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    Ok(value)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Some(url) = env_parse::<String>("ADRESSE_BASE_URL")? {
            config.adresse.base_url = validate_base_url("ADRESSE_BASE_URL", url)?;
        }
        if let Some(url) = env_parse::<String>("COMMUNE_BASE_URL")? {
            config.commune.base_url = validate_base_url("COMMUNE_BASE_URL", url)?;
        }
        if let Some(secs) = env_parse::<u64>("LOOKUP_TIMEOUT_SECS")? {
            if secs == 0 {
                anyhow::bail!("LOOKUP_TIMEOUT_SECS must be greater than 0");
            }
            config.adresse.timeout = Duration::from_secs(secs);
            config.commune.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("LOOKUP_RATE_LIMIT_MS")? {
            config.adresse.min_request_interval = Duration::from_millis(ms);
            config.commune.min_request_interval = Duration::from_millis(ms);
        }
        if let Some(max_items) = env_parse::<usize>("MAX_ITEMS")? {
            config.max_items = max_items;
        }
        if let Some(batch_size) = env_parse::<usize>("BATCH_SIZE")? {
            config.batch_size = batch_size;
        }
        if let Some(every) = env_parse::<usize>("PROGRESS_EVERY")? {
            config.progress_every = every;
        }
        if let Some(retries) = env_parse::<u32>("LOOKUP_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(secs) = env_parse::<u64>("LOOKUP_RETRY_INITIAL_BACKOFF_SECS")? {
            config.retry.initial_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LOOKUP_RETRY_MAX_BACKOFF_SECS")? {
            config.retry.max_backoff = Duration::from_secs(secs);
        }
        config.retry.validate()?;

        let thresholds = &mut config.quality.thresholds;
        if let Some(v) = env_parse::<f64>("QUALITY_COMPLETENESS_MIN")? {
            thresholds.completeness_min = v;
        }
        if let Some(v) = env_parse::<f64>("QUALITY_GEOCODING_SCORE_MIN")? {
            thresholds.geocoding_score_min = v;
        }
        if let Some(v) = env_parse::<f64>("QUALITY_DUPLICATES_MAX_PCT")? {
            thresholds.duplicates_max_pct = v;
        }
        thresholds.validate()?;
        if let Some(bands) = env_parse::<GradeBands>("QUALITY_GRADE_BANDS")? {
            config.quality.bands = bands;
        }
        if let Some(dir) = env_parse::<PathBuf>("DATA_DIR")? {
            config.paths = DataPaths::under(dir);
        }

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Adresse base URL: {}", config.adresse.base_url);
        tracing::debug!("Commune base URL: {}", config.commune.base_url);
        tracing::debug!(
            "Max items: {}, retries: {}",
            config.max_items,
            config.retry.max_retries
        );

        Ok(config)
    }
}
