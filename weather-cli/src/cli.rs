use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode};
use tracing::debug;
use weather_core::{Config, ProviderId, WeatherService};

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather",
    version,
    about = "Weather from several providers, merged into one answer"
)]
pub struct Cli {
    /// Log engine activity (cache hits, provider failures) to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,

        /// Make this the primary provider: queried first, wins merge ties.
        #[arg(long)]
        primary: bool,
    },

    /// List providers and whether they are active.
    Providers,

    /// Show current conditions for one or more locations.
    Current {
        /// Location names, e.g. "London" or "Paris, FR".
        #[arg(required = true)]
        locations: Vec<String>,

        /// Print the merged answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a daily forecast for a location.
    Forecast {
        location: String,

        /// Number of days; larger values are capped at the configured maximum.
        #[arg(long, short, allow_negative_numbers = true)]
        days: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// Search for locations matching a name.
    Search {
        text: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider, primary } => configure(&provider, primary),
            Command::Providers => {
                let config = Config::load_with_env()?;
                output::print_providers(&config);
                Ok(())
            }
            Command::Current { locations, json } => {
                let service = service()?;
                let lookups = locations.iter().map(|location| service.current(location));
                let answers = futures::future::join_all(lookups).await;
                debug!(stats = ?service.cache().stats(), "lookups finished");

                for (location, answer) in locations.iter().zip(answers) {
                    let answer =
                        answer.with_context(|| format!("No weather for '{location}'"))?;
                    output::print_answer(&answer, json)?;
                }
                Ok(())
            }
            Command::Forecast { location, days, json } => {
                let config = Config::load_with_env()?;
                let service = WeatherService::from_config(&config)?;
                let days = days.unwrap_or_else(|| i64::from(config.engine.default_forecast_days));

                let answer = service
                    .forecast(&location, days)
                    .await
                    .with_context(|| format!("No forecast for '{location}'"))?;
                output::print_answer(&answer, json)
            }
            Command::Search { text, limit, json } => {
                let found = service()?
                    .search_locations(&text, limit)
                    .await
                    .with_context(|| format!("Location search for '{text}' failed"))?;
                output::print_locations(&found, json)
            }
        }
    }
}

fn service() -> anyhow::Result<WeatherService> {
    let config = Config::load_with_env()?;
    Ok(WeatherService::from_config(&config)?)
}

fn configure(provider: &str, primary: bool) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    config.upsert_provider_api_key(id, api_key.trim().to_string());
    if primary {
        config.set_default_provider(id);
    }
    config.save()?;

    println!("Saved credentials for {id} to {}", Config::config_file_path()?.display());
    Ok(())
}
