use thiserror::Error;

/// Terminal failure of a single rain check.
///
/// Each variant maps to one externally-fallible stage of the pipeline. None of
/// them is retried beyond the provider fallbacks already built into the stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RainError {
    /// No IP address could be determined.
    #[error("{0}")]
    Resolution(String),

    /// No coordinates could be determined, even after the fallback IP.
    #[error("{0}")]
    Location(String),

    /// The forecast query failed or returned unusable data.
    #[error("{0}")]
    Forecast(String),
}

impl RainError {
    /// Stable kind name reported across the tool boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            RainError::Resolution(_) => "ResolutionError",
            RainError::Location(_) => "LocationError",
            RainError::Forecast(_) => "ForecastError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RainError::Resolution(msg) | RainError::Location(msg) | RainError::Forecast(msg) => {
                msg.as_str()
            }
        }
    }
}
