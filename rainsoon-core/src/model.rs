use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::error::RainError;

/// Threshold used when the caller does not pass one.
pub const DEFAULT_THRESHOLD: i64 = 20;

/// Place name reported when the geolocation provider knows no city.
pub const UNKNOWN_PLACE: &str = "your area";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RainRequest {
    /// Caller-supplied IP; `None` means auto-detect.
    pub ip: Option<String>,
    pub threshold: i64,
}

impl Default for RainRequest {
    fn default() -> Self {
        Self { ip: None, threshold: DEFAULT_THRESHOLD }
    }
}

impl RainRequest {
    pub fn new(ip: Option<String>, threshold: i64) -> Self {
        Self { ip, threshold }
    }

    /// The supplied IP with surrounding whitespace removed, if it is not blank.
    pub fn supplied_ip(&self) -> Option<&str> {
        self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub place_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HourlyEntry {
    /// Start of the hour, in the forecast location's local offset.
    pub time: DateTime<FixedOffset>,
    /// Percent chance of measurable precipitation, 0-100.
    pub precipitation_probability: u8,
}

/// Chronologically ordered hourly precipitation probabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourlySeries {
    pub entries: Vec<HourlyEntry>,
}

impl HourlySeries {
    pub fn new(entries: Vec<HourlyEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Successful outcome of a rain check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RainReport {
    pub ip: String,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub rain: bool,
    pub precipitation_chance: u8,
    pub threshold: i64,
    pub message: String,
    pub hour_sample: Vec<String>,
}

/// Error-shaped outcome, sent in place of a [`RainReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error: String,
    pub kind: String,
}

impl From<&RainError> for ErrorReport {
    fn from(err: &RainError) -> Self {
        Self { error: err.message().to_string(), kind: err.kind().to_string() }
    }
}

/// Render either outcome as the JSON payload returned to callers.
pub fn outcome_json(outcome: &Result<RainReport, RainError>) -> serde_json::Value {
    let value = match outcome {
        Ok(report) => serde_json::to_value(report),
        Err(err) => serde_json::to_value(ErrorReport::from(err)),
    };
    // Both types serialize to plain JSON objects.
    value.unwrap_or(serde_json::Value::Null)
}
