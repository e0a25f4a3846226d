use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{model::DEFAULT_THRESHOLD, provider::GeolocatorId};

/// Public-IP lookup endpoints, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLookupConfig {
    pub endpoints: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for IpLookupConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "https://api.ipify.org".to_string(),
                "https://ipinfo.io/ip".to_string(),
                "https://icanhazip.com".to_string(),
            ],
            timeout_secs: 5,
        }
    }
}

/// IP geolocation providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    /// Provider ids tried in order, e.g. `["ipinfo", "ipapi"]`.
    pub order: Vec<String>,
    pub ipinfo_url: String,
    pub ipinfo_token: Option<String>,
    pub ipapi_url: String,
    pub timeout_secs: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            order: GeolocatorId::all().iter().map(|id| id.as_str().to_string()).collect(),
            ipinfo_url: "https://ipinfo.io".to_string(),
            ipinfo_token: None,
            ipapi_url: "http://ip-api.com".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Hourly forecast provider (Open-Meteo).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub base_url: String,
    /// Whole days requested; two always covers the next 24 hours.
    pub forecast_days: u8,
    pub timeout_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com".to_string(),
            forecast_days: 2,
            timeout_secs: 10,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// default_threshold = 30
///
/// [geolocation]
/// order = ["ipapi", "ipinfo"]
/// ipinfo_token = "..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_threshold: i64,
    pub ip_lookup: IpLookupConfig,
    pub geolocation: GeolocationConfig,
    pub forecast: ForecastConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            ip_lookup: IpLookupConfig::default(),
            geolocation: GeolocationConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

impl Config {
    /// Geolocator order as strongly-typed ids.
    pub fn geolocator_ids(&self) -> Result<Vec<GeolocatorId>> {
        if self.geolocation.order.is_empty() {
            return Err(anyhow!(
                "No geolocation providers configured.\n\
                 Hint: set `[geolocation] order`, e.g. order = [\"ipinfo\", \"ipapi\"]."
            ));
        }

        self.geolocation.order.iter().map(|s| GeolocatorId::try_from(s.as_str())).collect()
    }

    /// Load config from the default location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    /// Load config from `path`, or defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        // Surface bad provider names at load time rather than on first request.
        cfg.geolocator_ids()
            .with_context(|| format!("Invalid geolocation settings in {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "rainsoon", "rainsoon")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Replace the ipinfo token; blank input clears it.
    pub fn set_ipinfo_token(&mut self, token: &str) {
        let token = token.trim();
        self.geolocation.ipinfo_token = (!token.is_empty()).then(|| token.to_string());
    }

    pub fn ip_lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.ip_lookup.timeout_secs)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_secs(self.geolocation.timeout_secs)
    }

    pub fn forecast_timeout(&self) -> Duration {
        Duration::from_secs(self.forecast.timeout_secs)
    }
}
