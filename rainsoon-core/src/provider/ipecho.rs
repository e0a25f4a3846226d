use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use std::{net::IpAddr, time::Duration};

use super::{IpLookup, http_client, truncate_body};

/// "What is my IP" endpoint answering with plain text or a JSON `{"ip": ...}` body.
#[derive(Debug, Clone)]
pub struct HttpIpLookup {
    url: String,
    http: Client,
}

impl HttpIpLookup {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self { url: url.to_string(), http: http_client(timeout)? })
    }
}

#[async_trait]
impl IpLookup for HttpIpLookup {
    fn name(&self) -> &str {
        &self.url
    }

    async fn public_ip(&self) -> Result<String> {
        let res = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.url))?;

        let status = res.status();
        let body = res.text().await.context("Failed to read IP lookup response body")?;

        if !status.is_success() {
            return Err(anyhow!(
                "IP lookup failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        extract_ip(&body)
            .ok_or_else(|| anyhow!("Response is not an IP address: {}", truncate_body(&body)))
    }
}

/// Pull a syntactically valid address out of a plain-text or JSON body.
fn extract_ip(body: &str) -> Option<String> {
    let trimmed = body.trim();

    if trimmed.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        let ip = value.get("ip")?.as_str()?.trim();
        return ip.parse::<IpAddr>().ok().map(|addr| addr.to_string());
    }

    trimmed.parse::<IpAddr>().ok().map(|addr| addr.to_string())
}
