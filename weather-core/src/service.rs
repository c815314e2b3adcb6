use std::{sync::Arc, time::Duration};

use tracing::warn;

use crate::{
    Config,
    aggregator::Aggregator,
    cache::ResultCache,
    error::{Result, WeatherError},
    model::{AggregatedAnswer, Location, Query, QueryKind},
    provider::{ProviderId, active_providers},
};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Entry point for callers: builds queries, answers from the cache when
/// possible and otherwise fans out through the aggregator.
///
/// One instance is meant to live for the whole process; clones share the
/// cache.
#[derive(Debug, Clone)]
pub struct WeatherService {
    aggregator: Aggregator,
    cache: ResultCache,
    request_timeout: Duration,
}

impl WeatherService {
    pub fn new(aggregator: Aggregator, cache: ResultCache) -> Self {
        Self {
            aggregator,
            cache,
            request_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Wires providers, aggregator and cache from configuration. Providers
    /// without credentials are left out.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = &config.engine;
        let providers = active_providers(config)?;
        if providers.is_empty() {
            warn!("no weather provider has an API key configured");
        }

        let aggregator = Aggregator::new(providers)
            .with_call_timeout(engine.provider_call_budget())
            .with_max_forecast_days(engine.max_forecast_days);
        let cache = ResultCache::new(engine.cache_ttl(), engine.cache_max_entries);

        Ok(Self::new(aggregator, cache).with_request_timeout(engine.request_timeout()))
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.aggregator.provider_ids()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn current(&self, location: &str) -> Result<Arc<AggregatedAnswer>> {
        self.lookup(Query::current(location)?).await
    }

    /// `days` below 1 is rejected; above the configured maximum it is clamped.
    pub async fn forecast(&self, location: &str, days: i64) -> Result<Arc<AggregatedAnswer>> {
        let max_days = self.aggregator.max_forecast_days();
        self.lookup(Query::forecast(location, days, max_days)?).await
    }

    pub async fn search_locations(&self, text: &str, limit: usize) -> Result<Vec<Location>> {
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
        let search = self.aggregator.search_locations(text, limit);

        tokio::time::timeout(self.request_timeout, search)
            .await
            .map_err(|_| WeatherError::Timeout { after: self.request_timeout })?
    }

    async fn lookup(&self, query: Query) -> Result<Arc<AggregatedAnswer>> {
        let aggregator = self.aggregator.clone();
        let key = query.clone();

        let work = self.cache.get_or_compute(&query, move || async move {
            match key.kind() {
                QueryKind::Current => aggregator.aggregate_current(&key).await,
                QueryKind::Forecast { .. } => aggregator.aggregate_forecast(&key).await,
            }
        });

        tokio::time::timeout(self.request_timeout, work)
            .await
            .map_err(|_| WeatherError::Timeout { after: self.request_timeout })?
    }
}
