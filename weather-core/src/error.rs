//! Error types for the aggregation engine.
//!
//! [`ProviderError`] describes a single provider's failure and never leaves the
//! aggregator. [`WeatherError`] is what callers of the engine see.

use std::{collections::BTreeMap, time::Duration};

use thiserror::Error;

use crate::provider::{Capability, ProviderId};

/// Failure of one provider call, after its retry policy ran out.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Transient network failure (timeout, connection error, 5xx/429/408) that
    /// persisted through the retry.
    #[error("{provider} is unavailable: {message}")]
    Unavailable { provider: ProviderId, message: String },

    /// The provider answered, but the answer was unusable.
    #[error("{provider} returned unusable data: {message}")]
    Data { provider: ProviderId, message: String },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderId {
        match self {
            ProviderError::Unavailable { provider, .. } | ProviderError::Data { provider, .. } => {
                *provider
            }
        }
    }
}

/// Errors surfaced by the engine to its caller.
///
/// `Clone` because a single failed computation is handed to every caller
/// waiting on the same cache key.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WeatherError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(
        "No provider configured for {capability}.\n\
         Hint: run `weather configure <provider>` or set OPENWEATHER_API_KEY / WEATHERAPI_KEY."
    )]
    NoProviderConfigured { capability: Capability },

    /// Every active provider failed; maps provider name to its failure.
    #[error("All providers failed: {}", describe_failures(.failures))]
    AllProvidersFailed { failures: BTreeMap<String, String> },

    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeatherError {
    /// True when the failure lies with upstream providers rather than with the
    /// request or local configuration.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            WeatherError::AllProvidersFailed { .. } | WeatherError::Timeout { .. }
        )
    }
}

fn describe_failures(failures: &BTreeMap<String, String>) -> String {
    if failures.is_empty() {
        return "no provider produced a result".to_string();
    }

    failures
        .iter()
        .map(|(provider, message)| format!("{provider}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, WeatherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_providers_failed_lists_each_failure() {
        let mut failures = BTreeMap::new();
        failures.insert("openweather".to_string(), "timed out".to_string());
        failures.insert("weatherapi".to_string(), "status 503".to_string());

        let msg = WeatherError::AllProvidersFailed { failures }.to_string();
        assert_eq!(
            msg,
            "All providers failed: openweather: timed out; weatherapi: status 503"
        );
    }

    #[test]
    fn upstream_classification() {
        assert!(WeatherError::Timeout { after: Duration::from_secs(1) }.is_upstream());
        assert!(!WeatherError::InvalidQuery("empty".into()).is_upstream());
        assert!(
            !WeatherError::NoProviderConfigured { capability: Capability::Current }.is_upstream()
        );
    }

    #[test]
    fn provider_error_reports_its_provider() {
        let err = ProviderError::Data {
            provider: ProviderId::WeatherApi,
            message: "missing field `current`".into(),
        };
        assert_eq!(err.provider(), ProviderId::WeatherApi);
        assert!(err.to_string().starts_with("weatherapi returned unusable data"));
    }
}
