use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ProviderError,
    model::{DailyReport, Location, ProviderResult, fields},
    provider::{ProviderId, get_json},
    retry::RetryPolicy,
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, http: Client) -> Self {
        Self {
            api_key,
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
    ) -> Result<(T, serde_json::Value), ProviderError> {
        query.insert(0, ("key", self.api_key.clone()));
        let url = format!("{}{path}", self.base_url);
        get_json(ProviderId::WeatherApi, &self.http, &self.retry, &url, &query).await
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl From<&WaLocation> for Location {
    fn from(loc: &WaLocation) -> Self {
        Location::named(&loc.name, &loc.country, loc.lat, loc.lon)
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: Option<f64>,
    humidity: Option<f64>,
    wind_kph: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: Option<f64>,
    mintemp_c: Option<f64>,
    avgtemp_c: Option<f64>,
    avghumidity: Option<f64>,
    condition: Option<WaCondition>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    forecast: WaForecast,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::WeatherApi
    }

    async fn current(&self, location: &str) -> Result<ProviderResult, ProviderError> {
        let (parsed, raw): (WaResponse, _) =
            self.get("/current.json", vec![("q", location.to_string())]).await?;

        let current = &parsed.current;
        let mut result = ProviderResult::new(ProviderId::WeatherApi, raw)
            .with_location(Location::from(&parsed.location));

        result.set_numeric(fields::TEMPERATURE_C, current.temp_c);
        result.set_numeric(fields::FEELS_LIKE_C, current.feelslike_c.unwrap_or(current.temp_c));
        if let Some(humidity) = current.humidity {
            result.set_numeric(fields::HUMIDITY_PCT, humidity);
        }
        if let Some(wind_kph) = current.wind_kph {
            result.set_numeric(fields::WIND_SPEED_MPS, wind_kph / 3.6);
        }
        if let Some(condition) = &current.condition {
            result.set_categorical(fields::CONDITION, &condition.text);
        }

        Ok(result)
    }

    async fn forecast(&self, location: &str, days: u8) -> Result<ProviderResult, ProviderError> {
        let (parsed, raw): (WaForecastResponse, _) = self
            .get(
                "/forecast.json",
                vec![
                    ("q", location.to_string()),
                    ("days", days.to_string()),
                    ("aqi", "no".to_string()),
                    ("alerts", "no".to_string()),
                ],
            )
            .await?;

        if parsed.forecast.forecastday.is_empty() {
            return Err(ProviderError::Data {
                provider: ProviderId::WeatherApi,
                message: "response contained no forecastday data".to_string(),
            });
        }

        let daily = parsed
            .forecast
            .forecastday
            .iter()
            .take(usize::from(days))
            .map(|fd| {
                let mut day = DailyReport::new(fd.date);
                let numeric = [
                    (fields::MIN_C, fd.day.mintemp_c),
                    (fields::MAX_C, fd.day.maxtemp_c),
                    (fields::AVG_C, fd.day.avgtemp_c),
                    (fields::HUMIDITY_PCT, fd.day.avghumidity),
                ];
                for (name, value) in numeric {
                    if let Some(value) = value {
                        day.set_numeric(name, value);
                    }
                }
                if let Some(condition) = &fd.day.condition {
                    day.set_categorical(fields::CONDITION, &condition.text);
                }
                day
            })
            .collect();

        let mut result = ProviderResult::new(ProviderId::WeatherApi, raw)
            .with_location(Location::from(&parsed.location));
        result.daily = daily;

        Ok(result)
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<Location>, ProviderError> {
        let (parsed, _raw): (Vec<WaLocation>, _) =
            self.get("/search.json", vec![("q", text.to_string())]).await?;

        Ok(parsed.iter().take(limit).map(Location::from).collect())
    }
}
