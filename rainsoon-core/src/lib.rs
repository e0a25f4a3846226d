//! Core library for `rainsoon`: "will it rain soon where this IP is?"
//!
//! This crate defines:
//! - Configuration handling
//! - Abstractions over IP lookup, geolocation and forecast providers
//! - The rain decision and the check that strings the providers together
//! - An MCP server exposing the check as a tool
//!
//! It is used by `rainsoon-cli`, but can also be embedded in other binaries.

pub mod check;
pub mod config;
pub mod decision;
pub mod error;
pub mod mcp;
pub mod model;
pub mod provider;

pub use check::{Located, RainChecker};
pub use config::Config;
pub use error::RainError;
pub use mcp::RainsoonServer;
pub use model::{
    ErrorReport, HourlyEntry, HourlySeries, Location, RainReport, RainRequest, outcome_json,
};
pub use provider::{ForecastProvider, Geolocator, GeolocatorId, IpLookup};
