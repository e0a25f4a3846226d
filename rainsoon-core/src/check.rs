use chrono::Utc;

use crate::{
    Config,
    decision::{decide, message},
    error::RainError,
    model::{Location, RainReport, RainRequest},
    provider::{
        ForecastProvider, Geolocator, IpLookup, first_success, forecast_from_config,
        geolocators_from_config, ip_lookups_from_config,
    },
};

/// An IP together with where it was located.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub ip: String,
    pub location: Location,
}

/// Runs one rain check: resolve IP, locate it, fetch the forecast, decide.
#[derive(Debug)]
pub struct RainChecker {
    ip_lookups: Vec<Box<dyn IpLookup>>,
    geolocators: Vec<Box<dyn Geolocator>>,
    forecast: Box<dyn ForecastProvider>,
}

impl RainChecker {
    pub fn new(
        ip_lookups: Vec<Box<dyn IpLookup>>,
        geolocators: Vec<Box<dyn Geolocator>>,
        forecast: Box<dyn ForecastProvider>,
    ) -> Self {
        Self { ip_lookups, geolocators, forecast }
    }

    /// Wire the HTTP-backed providers named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            ip_lookups_from_config(config)?,
            geolocators_from_config(config)?,
            forecast_from_config(config)?,
        ))
    }

    /// Return the candidate if it is not blank, otherwise ask the lookup services in order.
    pub async fn resolve_ip(&self, candidate: Option<&str>) -> Result<String, RainError> {
        if let Some(ip) = candidate.map(str::trim).filter(|ip| !ip.is_empty()) {
            return Ok(ip.to_string());
        }

        first_success(&self.ip_lookups, |l| l.name().to_string(), |l| l.public_ip())
            .await
            .map_err(|attempts| {
                RainError::Resolution(format!(
                    "Could not determine public IP from fallback services: {attempts}"
                ))
            })
    }

    /// Locate `ip`; on failure retry once with `fallback_ip` when it is a different address.
    pub async fn resolve_location(
        &self,
        ip: &str,
        fallback_ip: Option<&str>,
    ) -> Result<Located, RainError> {
        let first = match self.locate(ip).await {
            Ok(location) => return Ok(Located { ip: ip.to_string(), location }),
            Err(err) => err,
        };

        match fallback_ip.filter(|f| *f != ip) {
            Some(fallback) => {
                tracing::info!(%ip, %fallback, "retrying geolocation with fallback IP");
                let location = self.locate(fallback).await.map_err(|second| {
                    RainError::Location(format!("{first}; fallback IP {fallback} failed: {second}"))
                })?;
                Ok(Located { ip: fallback.to_string(), location })
            }
            None => Err(RainError::Location(first)),
        }
    }

    /// Run the whole pipeline. Any stage failure ends the check; nothing partial is returned.
    pub async fn check_for_rain(&self, request: &RainRequest) -> Result<RainReport, RainError> {
        let supplied = request.supplied_ip();
        let ip = self.resolve_ip(supplied).await?;
        tracing::debug!(%ip, supplied = supplied.is_some(), "resolved IP");

        let located = match supplied {
            // Auto-detected: there is no other address to fall back to.
            None => self.resolve_location(&ip, None).await?,
            Some(_) => self.locate_supplied(&ip).await?,
        };

        let Located { ip, location } = located;
        tracing::debug!(
            %ip,
            place = %location.place_name,
            lat = location.lat,
            lng = location.lng,
            "located"
        );

        let series = self
            .forecast
            .hourly_precipitation(location.lat, location.lng)
            .await
            .map_err(|e| RainError::Forecast(format!("Failed to fetch weather data: {e:#}")))?;

        let decision = decide(&series, request.threshold, Utc::now()).ok_or_else(|| {
            RainError::Forecast("Weather data missing precipitation probabilities.".to_string())
        })?;

        Ok(RainReport {
            message: message(decision.rain, decision.chance, &location.place_name),
            ip,
            location: location.place_name,
            lat: location.lat,
            lng: location.lng,
            rain: decision.rain,
            precipitation_chance: decision.chance,
            threshold: request.threshold,
            hour_sample: decision.sample,
        })
    }

    /// A caller-supplied IP falls back to the auto-detected public IP, detected only when needed.
    async fn locate_supplied(&self, ip: &str) -> Result<Located, RainError> {
        let first = match self.resolve_location(ip, None).await {
            Ok(located) => return Ok(located),
            Err(err) => err,
        };

        let auto_ip = self.resolve_ip(None).await.map_err(|second| {
            RainError::Location(format!("{first}; fallback to public IP failed: {second}"))
        })?;

        if auto_ip == ip {
            return Err(first);
        }

        tracing::info!(supplied = %ip, detected = %auto_ip, "falling back to detected public IP");
        self.resolve_location(&auto_ip, None).await.map_err(|second| {
            RainError::Location(format!("{first}; fallback to public IP failed: {second}"))
        })
    }

    async fn locate(&self, ip: &str) -> Result<Location, String> {
        first_success(&self.geolocators, |g| g.name().to_string(), |g| g.locate(ip))
            .await
            .map_err(|attempts| format!("Could not geolocate IP {ip}: {attempts}"))
    }
}
