use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ProviderError,
    merge::most_common,
    model::{DailyReport, Location, ProviderResult, fields},
    provider::{ProviderId, get_json},
    retry::RetryPolicy,
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
/// The 5-day forecast endpoint reports in 3-hour steps.
const STEPS_PER_DAY: u32 = 8;
const MAX_STEPS: u32 = 40;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenWeatherProvider {
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
        query.push(("appid", self.api_key.clone()));
        let url = format!("{}{path}", self.base_url);
        get_json(ProviderId::OpenWeather, &self.http, &self.retry, &url, &query).await
    }
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: Option<f64>,
    temp_min: Option<f64>,
    temp_max: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: String,
    coord: Option<OwCoord>,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    wind: Option<OwWind>,
    #[serde(default)]
    sys: OwSys,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
    coord: Option<OwCoord>,
    /// Shift in seconds from UTC.
    #[serde(default)]
    timezone: i64,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwGeoEntry {
    name: String,
    #[serde(default)]
    country: String,
    lat: f64,
    lon: f64,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenWeather
    }

    async fn current(&self, location: &str) -> Result<ProviderResult, ProviderError> {
        let (parsed, raw): (OwCurrentResponse, _) = self
            .get(
                "/data/2.5/weather",
                vec![("q", location.to_string()), ("units", "metric".to_string())],
            )
            .await?;

        let (lat, lon) = coords(parsed.coord.as_ref());
        let mut result = ProviderResult::new(ProviderId::OpenWeather, raw)
            .with_location(Location::named(&parsed.name, &parsed.sys.country, lat, lon));

        result.set_numeric(fields::TEMPERATURE_C, parsed.main.temp);
        result.set_numeric(
            fields::FEELS_LIKE_C,
            parsed.main.feels_like.unwrap_or(parsed.main.temp),
        );
        if let Some(humidity) = parsed.main.humidity {
            result.set_numeric(fields::HUMIDITY_PCT, humidity);
        }
        if let Some(wind) = parsed.wind {
            result.set_numeric(fields::WIND_SPEED_MPS, wind.speed);
        }
        if let Some(weather) = parsed.weather.first() {
            result.set_categorical(fields::CONDITION, &weather.description);
        }

        Ok(result)
    }

    async fn forecast(&self, location: &str, days: u8) -> Result<ProviderResult, ProviderError> {
        let steps = (u32::from(days) * STEPS_PER_DAY).min(MAX_STEPS);
        let (parsed, raw): (OwForecastResponse, _) = self
            .get(
                "/data/2.5/forecast",
                vec![
                    ("q", location.to_string()),
                    ("units", "metric".to_string()),
                    ("cnt", steps.to_string()),
                ],
            )
            .await?;

        let daily = group_by_day(&parsed.list, parsed.city.timezone, usize::from(days));
        if daily.is_empty() {
            return Err(ProviderError::Data {
                provider: ProviderId::OpenWeather,
                message: "forecast response contained no data".to_string(),
            });
        }

        let (lat, lon) = coords(parsed.city.coord.as_ref());
        let mut result = ProviderResult::new(ProviderId::OpenWeather, raw).with_location(
            Location::named(&parsed.city.name, &parsed.city.country, lat, lon),
        );
        result.daily = daily;

        Ok(result)
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<Location>, ProviderError> {
        let (parsed, _raw): (Vec<OwGeoEntry>, _) = self
            .get(
                "/geo/1.0/direct",
                vec![("q", text.to_string()), ("limit", limit.to_string())],
            )
            .await?;

        Ok(parsed
            .into_iter()
            .take(limit)
            .map(|g| Location::named(&g.name, &g.country, Some(g.lat), Some(g.lon)))
            .collect())
    }
}

fn coords(coord: Option<&OwCoord>) -> (Option<f64>, Option<f64>) {
    coord.map_or((None, None), |c| (Some(c.lat), Some(c.lon)))
}

/// Folds 3-hour steps into local calendar days: min of minima, max of maxima,
/// mean temperature and humidity, most frequent description.
fn group_by_day(entries: &[OwForecastEntry], utc_offset: i64, days: usize) -> Vec<DailyReport> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&OwForecastEntry>> = BTreeMap::new();

    for entry in entries {
        if let Some(local) = DateTime::from_timestamp(entry.dt + utc_offset, 0) {
            by_date.entry(local.date_naive()).or_default().push(entry);
        }
    }

    by_date
        .into_iter()
        .take(days)
        .map(|(date, steps)| {
            let mut day = DailyReport::new(date);

            let mins = steps.iter().map(|s| s.main.temp_min.unwrap_or(s.main.temp));
            let maxs = steps.iter().map(|s| s.main.temp_max.unwrap_or(s.main.temp));
            if let Some(min) = mins.reduce(f64::min) {
                day.set_numeric(fields::MIN_C, min);
            }
            if let Some(max) = maxs.reduce(f64::max) {
                day.set_numeric(fields::MAX_C, max);
            }
            if let Some(avg) = mean(steps.iter().map(|s| s.main.temp)) {
                day.set_numeric(fields::AVG_C, avg);
            }
            if let Some(humidity) = mean(steps.iter().filter_map(|s| s.main.humidity)) {
                day.set_numeric(fields::HUMIDITY_PCT, humidity);
            }

            let descriptions = steps
                .iter()
                .filter_map(|s| s.weather.first())
                .map(|w| w.description.as_str())
                .filter(|d| !d.is_empty());
            if let Some(condition) = most_common(descriptions) {
                day.set_categorical(fields::CONDITION, condition);
            }

            day
        })
        .collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / f64::from(count))
}
