use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

use crate::model::{Location, UNKNOWN_PLACE};

use super::{Geolocator, endpoint_url, http_client, parse_base_url, truncate_body};

/// ip-api.com geolocation (free JSON endpoint).
#[derive(Debug, Clone)]
pub struct IpApiGeolocator {
    base_url: Url,
    http: Client,
}

impl IpApiGeolocator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self { base_url: parse_base_url(base_url)?, http: http_client(timeout)? })
    }
}

#[derive(Debug, Deserialize)]
struct IaResponse {
    status: String,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
}

#[async_trait]
impl Geolocator for IpApiGeolocator {
    fn name(&self) -> &str {
        "ipapi"
    }

    async fn locate(&self, ip: &str) -> Result<Location> {
        let url = endpoint_url(&self.base_url, &["json", ip])?;

        let res = self
            .http
            .get(url)
            .query(&[("fields", "status,message,lat,lon,city")])
            .send()
            .await
            .context("Failed to send request to ip-api")?;

        let status = res.status();
        let body = res.text().await.context("Failed to read ip-api response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "ip-api request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        let parsed: IaResponse =
            serde_json::from_str(&body).context("Failed to parse ip-api JSON")?;

        into_location(ip, parsed)
    }
}

fn into_location(ip: &str, parsed: IaResponse) -> Result<Location> {
    if parsed.status != "success" {
        return Err(anyhow!(
            "ip-api could not geolocate {ip}: {}",
            parsed.message.unwrap_or_else(|| parsed.status.clone())
        ));
    }

    let (lat, lng) = parsed
        .lat
        .zip(parsed.lon)
        .ok_or_else(|| anyhow!("Could not geolocate IP {ip}."))?;

    let place_name = parsed
        .city
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_PLACE.to_string());

    Ok(Location { lat, lng, place_name })
}
