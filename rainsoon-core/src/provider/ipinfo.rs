use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::model::{Location, UNKNOWN_PLACE};

use super::{Geolocator, endpoint_url, http_client, parse_base_url, truncate_body};

/// ipinfo.io geolocation. Works without a token at a reduced rate limit.
#[derive(Debug, Clone)]
pub struct IpInfoGeolocator {
    base_url: Url,
    token: Option<String>,
    http: Client,
}

impl IpInfoGeolocator {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            token,
            http: http_client(timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct IiError {
    title: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IiResponse {
    city: Option<String>,
    /// `"lat,lng"`
    loc: Option<String>,
    #[serde(default)]
    bogon: bool,
    error: Option<IiError>,
}

#[async_trait]
impl Geolocator for IpInfoGeolocator {
    fn name(&self) -> &str {
        "ipinfo"
    }

    async fn locate(&self, ip: &str) -> Result<Location> {
        let url = endpoint_url(&self.base_url, &[ip, "json"])?;

        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.query(&[("token", token.as_str())]);
        }

        let res = req.send().await.context("Failed to send request to ipinfo")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read ipinfo response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "ipinfo request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: IiResponse =
            serde_json::from_str(&body).context("Failed to parse ipinfo JSON")?;

        into_location(ip, parsed)
    }
}

fn into_location(ip: &str, parsed: IiResponse) -> Result<Location> {
    if let Some(err) = parsed.error {
        return Err(anyhow!(
            "ipinfo error for {ip}: {}",
            err.message.or(err.title).unwrap_or_else(|| "unknown error".to_string())
        ));
    }

    if parsed.bogon {
        return Err(anyhow!("{ip} is a private or reserved address"));
    }

    let loc = parsed.loc.ok_or_else(|| anyhow!("Could not geolocate IP {ip}."))?;
    let (lat, lng) = parse_loc(&loc)
        .ok_or_else(|| anyhow!("ipinfo returned malformed coordinates '{loc}' for {ip}"))?;

    let place_name = parsed
        .city
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_PLACE.to_string());

    Ok(Location { lat, lng, place_name })
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lng) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
}
