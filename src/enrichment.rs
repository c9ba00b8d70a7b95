/// Two-stage enrichment of raw addresses
///
/// For each input address, strictly in order:
/// 1. Geocode the address via the BAN
/// 2. Resolve the commune of the geocode's INSEE code
/// 3. Merge both into an `EnrichedAddress`
///
/// An address failing either stage is counted and dropped; the batch goes on.
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, RetryPolicy};
use crate::errors::PipelineError;
use crate::models::{CommuneInfo, EnrichedAddress, EnrichmentStats, GeocodingResult, RunStats};
use crate::services::{AddressGeocoder, CommuneResolver};
use std::sync::Arc;

pub struct Enricher {
    geocoder: AddressGeocoder,
    resolver: CommuneResolver,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    progress_every: usize,
    stats: RunStats,
}

impl Enricher {
    /// Creates an `Enricher` with no retries.
    ///
    /// # Arguments
    ///
    /// * `geocoder` - Address lookup client.
    /// * `resolver` - Commune lookup client.
    /// * `clock` - Time source for retry backoff.
    pub fn new(geocoder: AddressGeocoder, resolver: CommuneResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            geocoder,
            resolver,
            clock,
            retry: RetryPolicy::default(),
            progress_every: 25,
            stats: RunStats::default(),
        }
    }

    /// Builds both lookup clients from configuration, on the wall clock.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let geocoder = AddressGeocoder::from_config(config.adresse.clone(), clock.clone())?;
        let resolver = CommuneResolver::from_config(config.commune.clone(), clock.clone())?;

        Ok(Self::new(geocoder, resolver, clock)
            .with_retry(config.retry)?
            .with_progress_every(config.progress_every))
    }

    /// Fails with a `Config` error when the backoff bounds are invalid.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Result<Self, PipelineError> {
        retry.validate()?;
        self.retry = retry;
        Ok(self)
    }

    /// Log a progress line every `every` addresses; 0 disables it.
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    /// Enrich addresses in input order.
    ///
    /// Failed addresses are absent from the output, leaving no gap. Stats keep
    /// accumulating across calls on the same instance.
    pub async fn enrich(&mut self, addresses: &[String]) -> Vec<EnrichedAddress> {
        tracing::info!("Enriching {} addresses", addresses.len());

        let mut enriched = Vec::new();
        for (idx, address) in addresses.iter().enumerate() {
            if let Some(record) = self.enrich_one(address).await {
                enriched.push(record);
            }

            let done = idx + 1;
            if self.progress_every > 0 && done % self.progress_every == 0 {
                tracing::info!(
                    "Enrichment progress: {}/{} ({} enriched so far)",
                    done,
                    addresses.len(),
                    enriched.len()
                );
            }
        }

        tracing::info!(
            "Enrichment complete: {} of {} addresses enriched ({} failed overall)",
            enriched.len(),
            addresses.len(),
            self.stats.failed
        );
        enriched
    }

    async fn enrich_one(&mut self, address: &str) -> Option<EnrichedAddress> {
        self.stats.total_addresses += 1;

        match self.try_enrich(address).await {
            Ok(record) => {
                self.stats.enriched += 1;
                Some(record)
            }
            Err(e @ PipelineError::NoMatch(_)) => {
                tracing::debug!("Dropping '{}': {}", address, e);
                self.stats.failed += 1;
                None
            }
            Err(e) => {
                tracing::warn!("Dropping '{}': {}", address, e);
                self.stats.failed += 1;
                None
            }
        }
    }

    async fn try_enrich(&mut self, address: &str) -> Result<EnrichedAddress, PipelineError> {
        let geo = self.geocode(address).await?;
        if !geo.is_valid() {
            return Err(PipelineError::NoMatch(address.to_string()));
        }
        self.stats.geocoded += 1;

        let citycode = geo.citycode.clone().unwrap_or_default();
        let commune = self
            .resolve_commune(&citycode)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("commune '{}'", citycode)))?;

        EnrichedAddress::merge(geo, commune)
            .ok_or_else(|| PipelineError::NoMatch(address.to_string()))
    }

    async fn geocode(&mut self, address: &str) -> Result<GeocodingResult, PipelineError> {
        retry_transient(
            &mut self.geocoder,
            address,
            "Geocoding",
            &self.retry,
            self.clock.as_ref(),
        )
        .await
    }

    async fn resolve_commune(&mut self, citycode: &str) -> Result<Option<CommuneInfo>, PipelineError> {
        retry_transient(
            &mut self.resolver,
            citycode,
            "Commune lookup",
            &self.retry,
            self.clock.as_ref(),
        )
        .await
    }

    /// Cumulative run counters plus both clients' request counters.
    pub fn get_stats(&self) -> EnrichmentStats {
        EnrichmentStats {
            run: self.stats,
            success_rate: self.stats.success_rate(),
            geocoder_stats: self.geocoder.stats(),
            commune_stats: self.resolver.stats(),
        }
    }
}

/// One keyed lookup against a remote service.
trait Lookup {
    type Output;

    async fn lookup(&mut self, key: &str) -> Result<Self::Output, PipelineError>;
}

impl Lookup for AddressGeocoder {
    type Output = GeocodingResult;

    async fn lookup(&mut self, key: &str) -> Result<GeocodingResult, PipelineError> {
        self.fetch_one(key).await
    }
}

impl Lookup for CommuneResolver {
    type Output = Option<CommuneInfo>;

    async fn lookup(&mut self, key: &str) -> Result<Option<CommuneInfo>, PipelineError> {
        self.fetch_one(key).await
    }
}

/// Runs `service.lookup(key)`, retrying transient errors up to `retry.max_retries` times.
///
/// The backoff series is only built once a retry is due, so a policy without
/// retries never touches it.
async fn retry_transient<L: Lookup>(
    service: &mut L,
    key: &str,
    label: &str,
    retry: &RetryPolicy,
    clock: &dyn Clock,
) -> Result<L::Output, PipelineError> {
    let mut delays = None;
    let mut attempt = 0;
    loop {
        match service.lookup(key).await {
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = delays
                    .get_or_insert_with(|| {
                        failsafe::backoff::exponential(retry.initial_backoff, retry.max_backoff)
                    })
                    .next()
                    .unwrap_or(retry.max_backoff);
                tracing::warn!(
                    "{} '{}' failed ({}), retry {}/{} in {:?}",
                    label,
                    key,
                    e,
                    attempt,
                    retry.max_retries,
                    delay
                );
                clock.sleep(delay).await;
            }
            other => return other,
        }
    }
}
