use crate::{
    Config, HourlySeries, Location,
    provider::{
        ipapi::IpApiGeolocator, ipecho::HttpIpLookup, ipinfo::IpInfoGeolocator,
        openmeteo::OpenMeteoForecast,
    },
};
use async_trait::async_trait;
use reqwest::Url;
use std::{convert::TryFrom, fmt::Debug, future::Future};

pub mod ipapi;
pub mod ipecho;
pub mod ipinfo;
pub mod openmeteo;

/// Discovers the public IP address of the machine running the check.
#[async_trait]
pub trait IpLookup: Send + Sync + Debug {
    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str;

    async fn public_ip(&self) -> anyhow::Result<String>;
}

/// Maps an IP address to coordinates and a place name.
#[async_trait]
pub trait Geolocator: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn locate(&self, ip: &str) -> anyhow::Result<Location>;
}

/// Supplies an hourly precipitation-probability series for coordinates.
#[async_trait]
pub trait ForecastProvider: Send + Sync + Debug {
    async fn hourly_precipitation(&self, lat: f64, lng: f64) -> anyhow::Result<HourlySeries>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeolocatorId {
    IpInfo,
    IpApi,
}

impl GeolocatorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeolocatorId::IpInfo => "ipinfo",
            GeolocatorId::IpApi => "ipapi",
        }
    }

    pub const fn all() -> &'static [GeolocatorId] {
        &[GeolocatorId::IpInfo, GeolocatorId::IpApi]
    }
}

impl std::fmt::Display for GeolocatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for GeolocatorId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.trim().to_lowercase();

        match lower.as_str() {
            "ipinfo" => Ok(GeolocatorId::IpInfo),
            "ipapi" => Ok(GeolocatorId::IpApi),
            _ => Err(anyhow::anyhow!(
                "Unknown geolocation provider '{value}'. Supported providers: ipinfo, ipapi."
            )),
        }
    }
}

/// Failures collected while walking an ordered candidate list.
#[derive(Debug, Default)]
pub struct Attempts {
    pub failures: Vec<(String, anyhow::Error)>,
}

impl std::fmt::Display for Attempts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("no candidates configured");
        }

        for (i, (label, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{label}: {err:#}")?;
        }
        Ok(())
    }
}

/// Try `candidates` strictly one at a time, in order, stopping at the first success.
///
/// `label` names a candidate for logs and for the returned [`Attempts`].
pub async fn first_success<'a, C, T, L, F, Fut>(
    candidates: &'a [C],
    label: L,
    mut attempt: F,
) -> Result<T, Attempts>
where
    L: Fn(&'a C) -> String,
    F: FnMut(&'a C) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempts = Attempts::default();

    for candidate in candidates {
        let name = label(candidate);
        tracing::debug!(candidate = %name, "trying candidate");

        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(candidate = %name, error = %format!("{err:#}"), "candidate failed");
                attempts.failures.push((name, err));
            }
        }
    }

    Err(attempts)
}

/// Build the configured public-IP lookups, in order.
pub fn ip_lookups_from_config(config: &Config) -> anyhow::Result<Vec<Box<dyn IpLookup>>> {
    let timeout = config.ip_lookup_timeout();

    config
        .ip_lookup
        .endpoints
        .iter()
        .map(|url| -> anyhow::Result<Box<dyn IpLookup>> {
            Ok(Box::new(HttpIpLookup::new(url, timeout)?))
        })
        .collect()
}

/// Construct a geolocator from config and explicit GeolocatorId.
pub fn geolocator_from_config(
    id: GeolocatorId,
    config: &Config,
) -> anyhow::Result<Box<dyn Geolocator>> {
    let geo = &config.geolocation;
    let timeout = config.geolocation_timeout();

    let boxed: Box<dyn Geolocator> = match id {
        GeolocatorId::IpInfo => Box::new(IpInfoGeolocator::new(
            &geo.ipinfo_url,
            geo.ipinfo_token.clone(),
            timeout,
        )?),
        GeolocatorId::IpApi => Box::new(IpApiGeolocator::new(&geo.ipapi_url, timeout)?),
    };

    Ok(boxed)
}

/// Build the configured geolocators, in order.
pub fn geolocators_from_config(config: &Config) -> anyhow::Result<Vec<Box<dyn Geolocator>>> {
    config.geolocator_ids()?.into_iter().map(|id| geolocator_from_config(id, config)).collect()
}

pub fn forecast_from_config(config: &Config) -> anyhow::Result<Box<dyn ForecastProvider>> {
    let forecast = &config.forecast;
    Ok(Box::new(OpenMeteoForecast::new(
        &forecast.base_url,
        forecast.forecast_days,
        config.forecast_timeout(),
    )?))
}

/// Build a reqwest client with the per-request timeout every provider uses.
pub(crate) fn http_client(timeout: std::time::Duration) -> anyhow::Result<reqwest::Client> {
    use anyhow::Context;

    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("rainsoon/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

pub(crate) fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    use anyhow::Context;

    Url::parse(raw).with_context(|| format!("Invalid base URL '{raw}'"))
}

/// `base` with `segments` appended as percent-escaped path segments.
pub(crate) fn endpoint_url(base: &Url, segments: &[&str]) -> anyhow::Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("'{base}' cannot be used as a base URL"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn geolocator_id_as_str_roundtrip() {
        for id in GeolocatorId::all() {
            let s = id.as_str();
            let parsed = GeolocatorId::try_from(s).expect("roundtrip should succeed");
            assert_eq!(*id, parsed);
        }
    }

    #[test]
    fn geolocator_id_is_case_insensitive() {
        assert_eq!(GeolocatorId::try_from("IPInfo").expect("parse"), GeolocatorId::IpInfo);
    }

    #[test]
    fn unknown_geolocator_error() {
        let err = GeolocatorId::try_from("doesnotexist").unwrap_err();
        assert!(err.to_string().contains("Unknown geolocation provider"));
    }

    #[tokio::test]
    async fn first_success_stops_at_first_ok() {
        let calls = AtomicUsize::new(0);
        let candidates = ["a", "b", "c"];

        let result = first_success(
            &candidates,
            |c| c.to_string(),
            |c| {
                calls.fetch_add(1, Ordering::SeqCst);
                let c = *c;
                async move {
                    if c == "b" { Ok(c.to_uppercase()) } else { Err(anyhow!("{c} down")) }
                }
            },
        )
        .await;

        assert_eq!(result.expect("b succeeds"), "B");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_success_reports_every_failure_in_order() {
        let candidates = ["x", "y"];

        let err = first_success(
            &candidates,
            |c| c.to_string(),
            |c| {
                let c = *c;
                async move { Err::<(), _>(anyhow!("{c} failed")) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.to_string(), "x: x failed; y: y failed");
    }

    #[tokio::test]
    async fn first_success_with_no_candidates() {
        let candidates: [&str; 0] = [];
        let err = first_success(&candidates, |c| c.to_string(), |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no candidates configured");
    }

    #[test]
    fn providers_build_from_default_config() {
        let cfg = Config::default();

        assert_eq!(ip_lookups_from_config(&cfg).expect("ip lookups").len(), 3);
        let geos = geolocators_from_config(&cfg).expect("geolocators");
        assert_eq!(geos.iter().map(|g| g.name()).collect::<Vec<_>>(), vec!["ipinfo", "ipapi"]);
        assert!(forecast_from_config(&cfg).is_ok());
    }

    #[test]
    fn endpoint_url_appends_to_base_path() {
        let base = parse_base_url("http://127.0.0.1:9000/ipinfo/").expect("base");
        let url = endpoint_url(&base, &["8.8.8.8", "json"]).expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/ipinfo/8.8.8.8/json");

        let root = parse_base_url("https://ipinfo.io").expect("base");
        let url = endpoint_url(&root, &["8.8.8.8", "json"]).expect("url");
        assert_eq!(url.as_str(), "https://ipinfo.io/8.8.8.8/json");
    }

    #[test]
    fn endpoint_url_escapes_reserved_characters() {
        let base = parse_base_url("https://ipinfo.io").expect("base");
        let url = endpoint_url(&base, &["1.2.3.4/evil?x=1#f", "json"]).expect("url");

        assert_eq!(url.path(), "/1.2.3.4%2Fevil%3Fx=1%23f/json");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = parse_base_url("not a url").unwrap_err();
        assert!(err.to_string().contains("Invalid base URL 'not a url'"));
    }

    #[test]
    fn truncate_body_limits_length() {
        let long = "x".repeat(300);
        assert_eq!(truncate_body(&long).len(), 203);
        assert_eq!(truncate_body("short"), "short");
    }
}
