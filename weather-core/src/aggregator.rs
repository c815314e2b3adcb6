//! Fan-out over every active provider and reconciliation of their answers.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::{
    error::{ProviderError, WeatherError},
    merge,
    model::{AggregatedAnswer, Location, MAX_FORECAST_DAYS, ProviderResult, Query, QueryKind},
    provider::{Capability, ProviderId, WeatherProvider},
    retry::RetryPolicy,
};

/// Default upper bound for one HTTP attempt against a provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

type Outcome = Result<ProviderResult, ProviderError>;

/// Calls all configured providers concurrently and merges what comes back.
///
/// Providers are kept in configured order; that order decides categorical
/// ties and which location record is reported.
#[derive(Debug, Clone)]
pub struct Aggregator {
    providers: Vec<Arc<dyn WeatherProvider>>,
    call_timeout: Duration,
    max_forecast_days: u8,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn WeatherProvider>>) -> Self {
        Self {
            providers,
            call_timeout: RetryPolicy::default().budget(DEFAULT_HTTP_TIMEOUT),
            max_forecast_days: MAX_FORECAST_DAYS,
        }
    }

    /// Bound on a whole provider call, retries included.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_max_forecast_days(mut self, max_forecast_days: u8) -> Self {
        self.max_forecast_days = max_forecast_days.max(1);
        self
    }

    pub fn max_forecast_days(&self) -> u8 {
        self.max_forecast_days
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub async fn aggregate_current(&self, query: &Query) -> Result<AggregatedAnswer, WeatherError> {
        if query.kind() != QueryKind::Current {
            return Err(WeatherError::InvalidQuery(format!(
                "{query} is not a current-conditions query"
            )));
        }

        let (results, failures) = self.fan_out(query.location(), None).await?;
        Ok(merge::merge_current(&results, failures))
    }

    pub async fn aggregate_forecast(
        &self,
        query: &Query,
    ) -> Result<AggregatedAnswer, WeatherError> {
        let requested = query.days().ok_or_else(|| {
            WeatherError::InvalidQuery(format!("{query} is not a forecast query"))
        })?;
        let days = requested.clamp(1, self.max_forecast_days);

        let (results, failures) = self.fan_out(query.location(), Some(days)).await?;
        Ok(merge::merge_forecast(&results, failures, days))
    }

    /// Location search. Providers are tried one at a time in configured order
    /// and the first successful answer wins.
    pub async fn search_locations(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<Location>, WeatherError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(WeatherError::InvalidQuery("search text must not be empty".to_string()));
        }

        let candidates: Vec<_> =
            self.providers.iter().filter(|p| p.supports(Capability::Search)).collect();
        if candidates.is_empty() {
            return Err(WeatherError::NoProviderConfigured { capability: Capability::Search });
        }

        let mut failures = BTreeMap::new();
        for provider in candidates {
            let id = provider.id();
            let outcome = tokio::time::timeout(self.call_timeout, provider.search(text, limit))
                .await
                .unwrap_or_else(|_| Err(self.timed_out(id)));

            match outcome {
                Ok(locations) => return Ok(locations),
                Err(err) => {
                    warn!(provider = %id, error = %err, "location search failed");
                    failures.insert(id.to_string(), err.to_string());
                }
            }
        }

        error!(text, "every provider failed location search");
        Err(WeatherError::AllProvidersFailed { failures })
    }

    /// Runs one call per provider in parallel and waits for all of them, each
    /// bounded by `call_timeout`. `days` selects forecast over current.
    ///
    /// Successes come back in configured order; failures are keyed by provider.
    async fn fan_out(
        &self,
        location: &str,
        days: Option<u8>,
    ) -> Result<(Vec<ProviderResult>, BTreeMap<String, String>), WeatherError> {
        let capability = if days.is_some() { Capability::Forecast } else { Capability::Current };
        let active: Vec<Arc<dyn WeatherProvider>> =
            self.providers.iter().filter(|p| p.supports(capability)).cloned().collect();

        if active.is_empty() {
            return Err(WeatherError::NoProviderConfigured { capability });
        }

        info!(location, %capability, providers = active.len(), "fanning out to providers");

        // Dropping the set aborts whatever is still running.
        let mut tasks = JoinSet::new();
        for (index, provider) in active.iter().cloned().enumerate() {
            let location = location.to_string();
            let call_timeout = self.call_timeout;
            let timed_out = self.timed_out(provider.id());

            tasks.spawn(async move {
                let call = async {
                    match days {
                        Some(days) => provider.forecast(&location, days).await,
                        None => provider.current(&location).await,
                    }
                };
                let outcome = tokio::time::timeout(call_timeout, call)
                    .await
                    .unwrap_or_else(|_| Err(timed_out));
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<Outcome>> = (0..active.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(err) => warn!(error = %err, "provider task did not complete"),
            }
        }

        let mut results = Vec::new();
        let mut failures = BTreeMap::new();
        for (provider, outcome) in active.iter().zip(outcomes) {
            let id = provider.id();
            match outcome {
                Some(Ok(result)) => results.push(result),
                Some(Err(err)) => {
                    warn!(provider = %id, error = %err, "provider failed");
                    failures.insert(id.to_string(), err.to_string());
                }
                None => {
                    failures.insert(id.to_string(), "provider task aborted".to_string());
                }
            }
        }

        if results.is_empty() {
            error!(location, %capability, "all providers failed");
            return Err(WeatherError::AllProvidersFailed { failures });
        }

        Ok((results, failures))
    }

    fn timed_out(&self, provider: ProviderId) -> ProviderError {
        ProviderError::Unavailable {
            provider,
            message: format!("no answer within {}ms", self.call_timeout.as_millis()),
        }
    }
}
