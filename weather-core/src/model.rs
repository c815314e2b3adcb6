use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::WeatherError, provider::ProviderId};

/// Upper bound for forecast day counts, shared by every provider.
pub const MAX_FORECAST_DAYS: u8 = 7;
pub const DEFAULT_FORECAST_DAYS: u8 = 3;

/// Well-known field names produced by the providers.
pub mod fields {
    pub const TEMPERATURE_C: &str = "temperature_c";
    pub const FEELS_LIKE_C: &str = "feels_like_c";
    pub const HUMIDITY_PCT: &str = "humidity_pct";
    pub const WIND_SPEED_MPS: &str = "wind_speed_mps";
    pub const MIN_C: &str = "min_c";
    pub const MAX_C: &str = "max_c";
    pub const AVG_C: &str = "avg_c";
    pub const CONDITION: &str = "condition";
}

pub type NumericFields = BTreeMap<String, f64>;
pub type CategoricalFields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Current,
    Forecast { days: u8 },
}

/// Normalized request parameters; equality defines cache-key identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    location: String,
    kind: QueryKind,
}

impl Query {
    pub fn current(location: &str) -> Result<Self, WeatherError> {
        Ok(Self {
            location: normalize_location(location)?,
            kind: QueryKind::Current,
        })
    }

    /// Builds a forecast query. Day counts below 1 are rejected, counts above
    /// `max_days` are clamped down to it.
    pub fn forecast(location: &str, days: i64, max_days: u8) -> Result<Self, WeatherError> {
        let location = normalize_location(location)?;

        if days < 1 {
            return Err(WeatherError::InvalidQuery(format!(
                "days must be at least 1, got {days}"
            )));
        }

        Ok(Self {
            location,
            kind: QueryKind::Forecast { days: clamp_days(days, max_days) },
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Requested forecast day count, `None` for current conditions.
    pub fn days(&self) -> Option<u8> {
        match self.kind {
            QueryKind::Current => None,
            QueryKind::Forecast { days } => Some(days),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            QueryKind::Current => write!(f, "current:{}", self.location),
            QueryKind::Forecast { days } => write!(f, "forecast:{}:{days}", self.location),
        }
    }
}

/// Trims, collapses inner whitespace and lowercases a location string.
pub fn normalize_location(raw: &str) -> Result<String, WeatherError> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    if normalized.is_empty() {
        return Err(WeatherError::InvalidQuery("location must not be empty".to_string()));
    }

    Ok(normalized)
}

/// Clamps a day count into `[1, max_days]`.
pub fn clamp_days(days: i64, max_days: u8) -> u8 {
    let max_days = max_days.max(1);
    days.clamp(1, i64::from(max_days)) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Location {
    /// "City, CC" style name; the country part is dropped when empty.
    pub fn named(city: &str, country: &str, lat: Option<f64>, lon: Option<f64>) -> Self {
        let name = match (city.trim(), country.trim()) {
            (city, "") => city.to_string(),
            ("", country) => country.to_string(),
            (city, country) => format!("{city}, {country}"),
        };

        Self { name, lat, lon }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.lat.is_none() && self.lon.is_none()
    }
}

/// Fields reported for a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub numeric_fields: NumericFields,
    pub categorical_fields: CategoricalFields,
}

impl DailyReport {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            numeric_fields: NumericFields::new(),
            categorical_fields: CategoricalFields::new(),
        }
    }

    pub fn set_numeric(&mut self, name: &str, value: f64) {
        if value.is_finite() {
            self.numeric_fields.insert(name.to_string(), value);
        }
    }

    pub fn set_categorical(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.categorical_fields.insert(name.to_string(), value.to_string());
        }
    }
}

/// One provider's normalized answer. Lives for a single aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider: ProviderId,
    pub location: Option<Location>,
    pub numeric_fields: NumericFields,
    pub categorical_fields: CategoricalFields,
    /// Per-day data for forecasts, empty for current conditions.
    pub daily: Vec<DailyReport>,
    pub raw_payload: Value,
}

impl ProviderResult {
    pub fn new(provider: ProviderId, raw_payload: Value) -> Self {
        Self {
            provider,
            location: None,
            numeric_fields: NumericFields::new(),
            categorical_fields: CategoricalFields::new(),
            daily: Vec::new(),
            raw_payload,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn set_numeric(&mut self, name: &str, value: f64) {
        if value.is_finite() {
            self.numeric_fields.insert(name.to_string(), value);
        }
    }

    pub fn set_categorical(&mut self, name: &str, value: &str) {
        let value = value.trim();
        if !value.is_empty() {
            self.categorical_fields.insert(name.to_string(), value.to_string());
        }
    }
}

/// The merged, cacheable answer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedAnswer {
    pub location: Option<Location>,
    pub numeric_fields: NumericFields,
    pub categorical_fields: CategoricalFields,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forecast: Vec<DailyReport>,
    /// Providers that contributed, in configured order.
    pub providers: Vec<String>,
    /// Providers that failed while others succeeded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, String>,
    #[serde(rename = "sources")]
    pub per_provider_raw: BTreeMap<String, Value>,
    pub as_of: DateTime<Utc>,
}
