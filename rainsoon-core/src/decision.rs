//! The rain verdict: pure functions over an hourly series, no I/O.

use chrono::{DateTime, Utc};

use crate::model::{HourlyEntry, HourlySeries};

/// How many leading timestamps are echoed back for inspection.
pub const SAMPLE_LEN: usize = 3;

const SAMPLE_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub rain: bool,
    pub chance: u8,
    pub sample: Vec<String>,
}

/// The first entry at or after `now`, or the first entry when every hour is in the past.
pub fn nearest_upcoming(series: &HourlySeries, now: DateTime<Utc>) -> Option<&HourlyEntry> {
    series.entries.iter().find(|e| e.time >= now).or_else(|| series.entries.first())
}

/// Compare the nearest upcoming hour against `threshold`. `None` for an empty series.
pub fn decide(series: &HourlySeries, threshold: i64, now: DateTime<Utc>) -> Option<Decision> {
    let entry = nearest_upcoming(series, now)?;
    let chance = entry.precipitation_probability;

    let sample = series
        .entries
        .iter()
        .take(SAMPLE_LEN)
        .map(|e| e.time.format(SAMPLE_FORMAT).to_string())
        .collect();

    Some(Decision { rain: i64::from(chance) >= threshold, chance, sample })
}

pub fn message(rain: bool, chance: u8, place_name: &str) -> String {
    let answer = if rain { "Yes" } else { "No" };
    format!("{answer}, {chance}% chance of rain soon in {place_name}.")
}
