//! Human-readable and JSON rendering of engine results.

use chrono::Local;
use weather_core::{
    AggregatedAnswer, Config, Location, ProviderId,
    model::{NumericFields, fields},
};

pub fn print_answer(answer: &AggregatedAnswer, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }

    match &answer.location {
        Some(location) => println!("{}", describe_location(location)),
        None => println!("(unknown location)"),
    }

    if answer.forecast.is_empty() {
        print_current(answer);
    } else {
        print_forecast(answer);
    }

    println!(
        "  as of {} via {}",
        answer.as_of.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        answer.providers.join(", ")
    );
    for (provider, reason) in &answer.failures {
        println!("  ! {provider} failed: {reason}");
    }

    Ok(())
}

fn print_current(answer: &AggregatedAnswer) {
    if let Some(condition) = answer.categorical_fields.get(fields::CONDITION) {
        println!("  {condition}");
    }

    let rows = [
        ("Temperature", fields::TEMPERATURE_C, "°C"),
        ("Feels like", fields::FEELS_LIKE_C, "°C"),
        ("Humidity", fields::HUMIDITY_PCT, "%"),
        ("Wind", fields::WIND_SPEED_MPS, " m/s"),
    ];
    for (label, field, unit) in rows {
        if let Some(value) = answer.numeric_fields.get(field) {
            println!("  {label:<12} {value:.1}{unit}");
        }
    }
}

fn print_forecast(answer: &AggregatedAnswer) {
    println!("  {:<10}  {:>6}  {:>6}  {:>6}  condition", "date", "min", "max", "avg");
    for day in &answer.forecast {
        let condition = day.categorical_fields.get(fields::CONDITION).map_or("-", String::as_str);
        println!(
            "  {}  {:>6}  {:>6}  {:>6}  {condition}",
            day.date,
            cell(&day.numeric_fields, fields::MIN_C),
            cell(&day.numeric_fields, fields::MAX_C),
            cell(&day.numeric_fields, fields::AVG_C),
        );
    }
}

fn cell(values: &NumericFields, field: &str) -> String {
    values.get(field).map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

pub fn print_locations(found: &[Location], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "results": found }))?);
        return Ok(());
    }

    if found.is_empty() {
        println!("No matching locations.");
    }
    for location in found {
        println!("{}", describe_location(location));
    }
    Ok(())
}

pub fn print_providers(config: &Config) {
    let primary = config.default_provider_id().ok();

    for id in config.provider_order() {
        let status = if config.is_provider_configured(id) { "active" } else { "no API key" };
        let marker = if Some(id) == primary { " (primary)" } else { "" };
        println!("{:<12} {status}{marker}", id.as_str());
    }

    if config.active_provider_ids().is_empty() {
        println!(
            "\nHint: run `weather configure <provider>` or set {} / {}.",
            ProviderId::OpenWeather.env_key(),
            ProviderId::WeatherApi.env_key()
        );
    }
}

fn describe_location(location: &Location) -> String {
    match (location.lat, location.lon) {
        (Some(lat), Some(lon)) => format!("{} ({lat:.2}, {lon:.2})", location.name),
        _ => location.name.clone(),
    }
}
