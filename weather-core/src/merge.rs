//! Deterministic reconciliation of provider results.
//!
//! Every function here consumes results in configured provider order and is
//! stable for a given input order: numeric fields are averaged over the
//! providers that reported them, categorical fields take the most frequent
//! value with the earliest provider winning ties.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};

use crate::model::{
    AggregatedAnswer, CategoricalFields, DailyReport, Location, NumericFields, ProviderResult,
};

/// Rounds to two decimal places, exact halves going to the even neighbour.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Most frequent value; among equally frequent values the one seen first wins.
pub fn most_common<T, I>(values: I) -> Option<T>
where
    T: PartialEq,
    I: IntoIterator<Item = T>,
{
    let mut tallies: Vec<(T, usize)> = Vec::new();
    for value in values {
        match tallies.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => tallies.push((value, 1)),
        }
    }

    tallies
        .into_iter()
        .fold(None, |best: Option<(T, usize)>, (value, count)| match best {
            Some((kept, kept_count)) if kept_count >= count => Some((kept, kept_count)),
            _ => Some((value, count)),
        })
        .map(|(value, _)| value)
}

/// Mean of each numeric field over the sources that reported it. Fields no
/// source reported are absent from the output.
pub fn mean_fields<'a, I>(sources: I) -> NumericFields
where
    I: IntoIterator<Item = &'a NumericFields>,
{
    let mut sums: BTreeMap<&'a str, (f64, u32)> = BTreeMap::new();
    for fields in sources {
        for (name, value) in fields {
            let (sum, count) = sums.entry(name.as_str()).or_insert((0.0, 0));
            *sum += value;
            *count += 1;
        }
    }

    sums.into_iter()
        .map(|(name, (sum, count))| (name.to_string(), round2(sum / f64::from(count))))
        .collect()
}

/// Mode of each categorical field over the sources that reported it.
pub fn mode_fields<'a, I>(sources: I) -> CategoricalFields
where
    I: IntoIterator<Item = &'a CategoricalFields>,
{
    let mut values: BTreeMap<&'a str, Vec<&'a str>> = BTreeMap::new();
    for fields in sources {
        for (name, value) in fields {
            values.entry(name.as_str()).or_default().push(value.as_str());
        }
    }

    values
        .into_iter()
        .filter_map(|(name, seen)| {
            most_common(seen).map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// First non-empty location in provider order; locations are never averaged.
pub fn first_location(results: &[ProviderResult]) -> Option<Location> {
    results
        .iter()
        .filter_map(|r| r.location.as_ref())
        .find(|loc| !loc.is_empty())
        .cloned()
}

/// Merges current-conditions results.
pub fn merge_current(
    results: &[ProviderResult],
    failures: BTreeMap<String, String>,
) -> AggregatedAnswer {
    AggregatedAnswer {
        numeric_fields: mean_fields(results.iter().map(|r| &r.numeric_fields)),
        categorical_fields: mode_fields(results.iter().map(|r| &r.categorical_fields)),
        ..envelope(results, failures)
    }
}

/// Merges forecast results: days are aligned by date across providers, merged
/// independently, and the date-ordered list is cut or padded to exactly `days`
/// entries. Padding days carry no fields.
pub fn merge_forecast(
    results: &[ProviderResult],
    failures: BTreeMap<String, String>,
    days: u8,
) -> AggregatedAnswer {
    let mut by_date: BTreeMap<NaiveDate, Vec<&DailyReport>> = BTreeMap::new();
    for result in results {
        for day in &result.daily {
            by_date.entry(day.date).or_default().push(day);
        }
    }

    let wanted = usize::from(days);
    let mut forecast: Vec<DailyReport> = by_date
        .into_iter()
        .take(wanted)
        .map(|(date, reports)| DailyReport {
            date,
            numeric_fields: mean_fields(reports.iter().map(|d| &d.numeric_fields)),
            categorical_fields: mode_fields(reports.iter().map(|d| &d.categorical_fields)),
        })
        .collect();

    let answer = envelope(results, failures);

    let mut next = forecast
        .last()
        .and_then(|d| d.date.succ_opt())
        .unwrap_or_else(|| answer.as_of.date_naive());
    while forecast.len() < wanted {
        forecast.push(DailyReport::new(next));
        match next.succ_opt() {
            Some(date) => next = date,
            None => break,
        }
    }

    AggregatedAnswer { forecast, ..answer }
}

fn envelope(results: &[ProviderResult], failures: BTreeMap<String, String>) -> AggregatedAnswer {
    AggregatedAnswer {
        location: first_location(results),
        numeric_fields: NumericFields::new(),
        categorical_fields: CategoricalFields::new(),
        forecast: Vec::new(),
        providers: results.iter().map(|r| r.provider.to_string()).collect(),
        failures,
        per_provider_raw: results
            .iter()
            .map(|r| (r.provider.to_string(), r.raw_payload.clone()))
            .collect(),
        as_of: Utc::now(),
    }
}
