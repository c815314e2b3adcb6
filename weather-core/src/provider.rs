use crate::{
    Config,
    error::{ProviderError, WeatherError},
    model::{Location, ProviderResult},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
    retry::{Failure, RetryPolicy},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    /// Built-in provider order, used after the primary provider.
    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }

    /// Environment variable that may carry this provider's API key.
    pub fn env_key(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// What a provider can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Current,
    Forecast,
    Search,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::Current => "current conditions",
            Capability::Forecast => "forecast",
            Capability::Search => "location search",
        })
    }
}

/// One external weather service, normalized to [`ProviderResult`].
///
/// Implementations hold no shared mutable state; retries happen inside each
/// call according to the client's [`RetryPolicy`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn current(&self, location: &str) -> Result<ProviderResult, ProviderError>;

    /// Per-day forecast for `days` days, keyed by calendar date in
    /// [`ProviderResult::daily`].
    async fn forecast(&self, location: &str, days: u8) -> Result<ProviderResult, ProviderError>;

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<Location>, ProviderError>;
}

/// Builds the shared HTTP client; `timeout` bounds every single attempt.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
    http: Client,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;
    let retry = config.engine.retry_policy();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => {
            Arc::new(OpenWeatherProvider::new(api_key.to_owned(), http).with_retry(retry))
        }
        ProviderId::WeatherApi => {
            Arc::new(WeatherApiProvider::new(api_key.to_owned(), http).with_retry(retry))
        }
    };

    Ok(provider)
}

/// Every credentialed provider, in configured order. Providers without an API
/// key are simply left out.
pub fn active_providers(config: &Config) -> Result<Vec<Arc<dyn WeatherProvider>>, WeatherError> {
    let http = http_client(config.engine.http_timeout())
        .map_err(|e| WeatherError::Config(format!("failed to build HTTP client: {e}")))?;

    config
        .active_provider_ids()
        .into_iter()
        .map(|id| {
            provider_from_config(id, config, http.clone())
                .map_err(|e| WeatherError::Config(e.to_string()))
        })
        .collect()
}

/// GET `url` and decode the body as `T`, retrying transient failures.
///
/// Returns the typed body along with the raw JSON so callers can keep the
/// provider's payload.
pub(crate) async fn get_json<T: DeserializeOwned>(
    provider: ProviderId,
    http: &Client,
    retry: &RetryPolicy,
    url: &str,
    query: &[(&str, String)],
) -> Result<(T, Value), ProviderError> {
    let label = format!("{provider} {}", redact_path(url));

    let raw = retry
        .run(&label, || fetch_once(http, url, query))
        .await
        .map_err(|failure| match failure {
            Failure::Transient(message) => ProviderError::Unavailable { provider, message },
            Failure::Permanent(message) => ProviderError::Data { provider, message },
        })?;

    let typed = serde_json::from_value(raw.clone()).map_err(|e| ProviderError::Data {
        provider,
        message: format!("unexpected response shape: {e}"),
    })?;

    Ok((typed, raw))
}

async fn fetch_once(http: &Client, url: &str, query: &[(&str, String)]) -> Result<Value, Failure> {
    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| Failure::Transient(describe_transport_error(e)))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| {
            Failure::Transient(format!("failed to read response body: {}", e.without_url()))
        })?;

    if !status.is_success() {
        let message = format!("request failed with status {status}: {}", truncate_body(&body));
        return Err(if is_transient_status(status) {
            Failure::Transient(message)
        } else {
            Failure::Permanent(message)
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| Failure::Permanent(format!("failed to parse JSON body: {e}")))
}

/// 408, 429 and every 5xx are worth a retry.
pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn describe_transport_error(err: reqwest::Error) -> String {
    // Query strings carry API keys; never let them reach logs.
    let err = err.without_url();
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    }
}

fn redact_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}
