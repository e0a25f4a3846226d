use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::model::{HourlyEntry, HourlySeries};

use super::{ForecastProvider, endpoint_url, http_client, parse_base_url, truncate_body};

/// Open-Meteo hourly precipitation probability.
#[derive(Debug, Clone)]
pub struct OpenMeteoForecast {
    base_url: Url,
    forecast_days: u8,
    http: Client,
}

impl OpenMeteoForecast {
    pub fn new(base_url: &str, forecast_days: u8, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            forecast_days: forecast_days.max(1),
            http: http_client(timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    /// Unix seconds (`timeformat=unixtime`).
    #[serde(default)]
    time: Vec<i64>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    #[serde(default)]
    utc_offset_seconds: i32,
    hourly: Option<OmHourly>,
}

#[derive(Debug, Deserialize)]
struct OmError {
    reason: String,
}

#[async_trait]
impl ForecastProvider for OpenMeteoForecast {
    async fn hourly_precipitation(&self, lat: f64, lng: f64) -> Result<HourlySeries> {
        let url = endpoint_url(&self.base_url, &["v1", "forecast"])?;

        let res = self
            .http
            .get(url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lng.to_string()),
                ("hourly", "precipitation_probability".to_string()),
                ("forecast_days", self.forecast_days.to_string()),
                ("timezone", "auto".to_string()),
                ("timeformat", "unixtime".to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to Open-Meteo")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read Open-Meteo response body")?;

        if !status.is_success() {
            let detail = serde_json::from_str::<OmError>(&body)
                .map(|e| e.reason)
                .unwrap_or_else(|_| truncate_body(&body));
            return Err(anyhow!("Open-Meteo request failed with status {}: {}", status, detail));
        }

        let parsed: OmResponse =
            serde_json::from_str(&body).context("Failed to parse Open-Meteo JSON")?;

        into_series(parsed)
    }
}

fn into_series(parsed: OmResponse) -> Result<HourlySeries> {
    let hourly = parsed
        .hourly
        .ok_or_else(|| anyhow!("Weather data missing hourly section."))?;

    if hourly.time.len() != hourly.precipitation_probability.len() {
        return Err(anyhow!(
            "Weather data has {} timestamps but {} precipitation values.",
            hourly.time.len(),
            hourly.precipitation_probability.len()
        ));
    }

    // Instants come from the unix timestamps; the offset only affects how they render.
    let offset = FixedOffset::east_opt(parsed.utc_offset_seconds)
        .ok_or_else(|| anyhow!("Invalid UTC offset {}s", parsed.utc_offset_seconds))?;

    let mut entries = Vec::with_capacity(hourly.time.len());
    for (ts, prob) in hourly.time.iter().zip(hourly.precipitation_probability) {
        // Hours the model has no value for are left out of the series.
        let Some(prob) = prob else { continue };

        let time = DateTime::from_timestamp(*ts, 0)
            .ok_or_else(|| anyhow!("Forecast timestamp {ts} is out of range"))?
            .with_timezone(&offset);

        entries.push(HourlyEntry {
            time,
            precipitation_probability: prob.round().clamp(0.0, 100.0) as u8,
        });
    }

    if entries.is_empty() {
        return Err(anyhow!("Weather data missing precipitation probabilities."));
    }

    Ok(HourlySeries::new(entries))
}
