//! In-memory provider used by the engine's unit tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use parking_lot::Mutex;
use serde_json::json;

use crate::{
    error::ProviderError,
    model::{AggregatedAnswer, DailyReport, Location, ProviderResult, fields},
    provider::{Capability, ProviderId, WeatherProvider},
};

#[derive(Debug, Clone)]
pub(crate) struct FakeProvider {
    id: ProviderId,
    reading: Result<(f64, String), ProviderError>,
    delay: Duration,
    searchable: bool,
    calls: Arc<AtomicUsize>,
    requested_days: Arc<Mutex<Vec<u8>>>,
}

impl FakeProvider {
    pub(crate) fn ok(id: ProviderId, temp: f64, condition: &str) -> Self {
        Self::with_reading(id, Ok((temp, condition.to_string())))
    }

    pub(crate) fn failing(id: ProviderId) -> Self {
        Self::with_reading(
            id,
            Err(ProviderError::Unavailable {
                provider: id,
                message: "connection refused".to_string(),
            }),
        )
    }

    fn with_reading(id: ProviderId, reading: Result<(f64, String), ProviderError>) -> Self {
        Self {
            id,
            reading,
            delay: Duration::ZERO,
            searchable: true,
            calls: Arc::new(AtomicUsize::new(0)),
            requested_days: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn without_search(mut self) -> Self {
        self.searchable = false;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requested_days(&self) -> Vec<u8> {
        self.requested_days.lock().clone()
    }

    pub(crate) fn shared(&self) -> Arc<dyn WeatherProvider> {
        Arc::new(self.clone())
    }

    async fn answer(&self) -> Result<(f64, String), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reading.clone()
    }

    fn location(&self) -> Location {
        Location::named("Fake City", self.id.as_str(), Some(1.0), Some(2.0))
    }
}

pub(crate) fn first_forecast_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 26).expect("valid date")
}

#[async_trait]
impl WeatherProvider for FakeProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn supports(&self, capability: Capability) -> bool {
        capability != Capability::Search || self.searchable
    }

    async fn current(&self, _location: &str) -> Result<ProviderResult, ProviderError> {
        let (temp, condition) = self.answer().await?;

        let mut result = ProviderResult::new(self.id, json!({ "temp": temp }))
            .with_location(self.location());
        result.set_numeric(fields::TEMPERATURE_C, temp);
        result.set_categorical(fields::CONDITION, &condition);
        Ok(result)
    }

    async fn forecast(&self, _location: &str, days: u8) -> Result<ProviderResult, ProviderError> {
        self.requested_days.lock().push(days);
        let (temp, condition) = self.answer().await?;

        let mut result = ProviderResult::new(self.id, json!({ "days": days }))
            .with_location(self.location());
        result.daily = (0..u64::from(days))
            .filter_map(|offset| first_forecast_date().checked_add_days(Days::new(offset)))
            .map(|date| {
                let mut day = DailyReport::new(date);
                day.set_numeric(fields::AVG_C, temp);
                day.set_categorical(fields::CONDITION, &condition);
                day
            })
            .collect();
        Ok(result)
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<Location>, ProviderError> {
        self.answer().await?;
        Ok(std::iter::repeat_with(|| Location::named(text, self.id.as_str(), None, None))
            .take(limit.min(2))
            .collect())
    }
}

/// A merged answer carrying only a temperature, for cache tests.
pub(crate) fn answer_with_temp(temp: f64) -> AggregatedAnswer {
    let mut result = ProviderResult::new(ProviderId::OpenWeather, json!({}));
    result.set_numeric(fields::TEMPERATURE_C, temp);
    crate::merge::merge_current(&[result], Default::default())
}
