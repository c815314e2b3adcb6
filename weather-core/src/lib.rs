//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Clients for the supported weather providers, behind one trait
//! - The aggregator that fans a query out to every active provider and merges
//!   their answers
//! - A TTL result cache with single-flight computation
//!
//! It is used by `weather-cli`, but can also be embedded by other binaries or
//! services through [`WeatherService`].

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod provider;
pub mod retry;
pub mod service;

#[cfg(test)]
mod testing;

pub use aggregator::Aggregator;
pub use cache::{CacheStats, ResultCache};
pub use config::{Config, EngineSettings, ProviderConfig};
pub use error::{ProviderError, WeatherError};
pub use model::{AggregatedAnswer, DailyReport, Location, ProviderResult, Query, QueryKind};
pub use provider::{Capability, ProviderId, WeatherProvider};
pub use retry::RetryPolicy;
pub use service::WeatherService;
