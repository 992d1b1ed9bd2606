//! Forecast decision and prediction engine
//!
//! The engine decides when a refresh is due, chooses between a single
//! stationary fetch and a moving-vessel forecast along the predicted track,
//! and publishes package-scoped, unit-normalized records.

pub mod assembler;
pub mod engine;
pub mod normalize;
pub mod query;
pub mod store;
pub mod trigger;

pub use assembler::{Assembly, AssemblyFailure, MovingForecastAssembler};
pub use engine::{
    parse_engagement_value, Clock, CycleOutcome, CycleSummary, EngineConfig, EngineEvent, EngineState,
    ForecastEngine, ForecastMode, SystemClock,
};
pub use query::{QueryKind, WeatherData, WeatherQuery};
pub use store::{Publisher, RecordStore};
pub use trigger::should_refresh;

use thiserror::Error;

use crate::data::{FetchError, Granularity, Package};

/// Errors surfaced by a refresh cycle or at the command boundary
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The session cannot produce a forecast as configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A cycle was requested before any position arrived
    #[error("No vessel position known yet")]
    NoPosition,

    /// The provider fetch failed
    #[error("Forecast fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The provider frame lacks the time column for a package
    #[error("Provider data for {package} ({granularity}) has no time column")]
    DataShape {
        package: Package,
        granularity: Granularity,
    },

    /// An engagement command carried a non-boolean value
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl ForecastError {
    /// Short machine-readable kind for structured reports
    pub fn kind(&self) -> &'static str {
        match self {
            ForecastError::Configuration(_) => "configuration",
            ForecastError::NoPosition => "no_position",
            ForecastError::Fetch(_) => "fetch",
            ForecastError::DataShape { .. } => "data_shape",
            ForecastError::InvalidCommand(_) => "invalid_command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ForecastError::Configuration("x".into()).kind(), "configuration");
        assert_eq!(
            ForecastError::Fetch(FetchError::Provider("down".into())).kind(),
            "fetch"
        );
        assert_eq!(
            ForecastError::DataShape {
                package: Package::Sea,
                granularity: Granularity::Daily
            }
            .kind(),
            "data_shape"
        );
        assert_eq!(ForecastError::InvalidCommand("7".into()).kind(), "invalid_command");
    }

    #[test]
    fn test_data_shape_message_names_package() {
        let err = ForecastError::DataShape {
            package: Package::Sea,
            granularity: Granularity::Hourly,
        };
        assert_eq!(
            err.to_string(),
            "Provider data for sea (hourly) has no time column"
        );
    }
}
