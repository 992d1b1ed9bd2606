//! Core data models for vesselcast
//!
//! This module contains the value types shared by the forecast engine:
//! vessel positions and navigation state, forecast packages and their
//! granularity, and the normalized records the engine publishes.

pub mod geodesy;
pub mod packages;
pub mod provider;
pub mod units;

pub use geodesy::{haversine_distance, is_moving, predict_position};
pub use packages::{douglas_sea_state_description, douglas_sea_state_simple, fields_for};
pub use provider::{FetchError, ForecastFetcher, MeteoblueClient, RawProviderFrame, METEOBLUE_BASE_URL};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A vessel position at a specific instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// When the vessel was (or is predicted to be) here
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Creates a new position
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }
}

/// Latest navigation data received from the host
///
/// Each field is updated independently and may be cleared independently.
/// Movement prediction needs both `heading` and `sog`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationState {
    /// Last known position
    pub position: Option<Position>,
    /// True heading in radians
    pub heading: Option<f64>,
    /// Speed over ground in m/s
    pub sog: Option<f64>,
}

/// Forecast resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hourly,
    Daily,
}

impl Granularity {
    /// Suffix the provider uses in package paths (`basic-1h`, `basic-day`)
    pub fn provider_suffix(self) -> &'static str {
        match self {
            Granularity::Hourly => "1h",
            Granularity::Daily => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Hourly => f.write_str("hourly"),
            Granularity::Daily => f.write_str("daily"),
        }
    }
}

/// A named subset of weather fields offered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    Basic,
    Wind,
    Sea,
    Solar,
    Trend,
    Clouds,
}

impl Package {
    /// All packages in provider order
    pub const ALL: [Package; 6] = [
        Package::Basic,
        Package::Wind,
        Package::Sea,
        Package::Solar,
        Package::Trend,
        Package::Clouds,
    ];

    /// Provider name of the package
    pub fn as_str(self) -> &'static str {
        match self {
            Package::Basic => "basic",
            Package::Wind => "wind",
            Package::Sea => "sea",
            Package::Solar => "solar",
            Package::Trend => "trend",
            Package::Clouds => "clouds",
        }
    }

    /// Parses a package name (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        Package::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (package, granularity) pair requested from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageRequest {
    pub package: Package,
    pub granularity: Granularity,
}

impl PackageRequest {
    pub fn new(package: Package, granularity: Granularity) -> Self {
        Self {
            package,
            granularity,
        }
    }

    /// Provider path segment, e.g. `sea-1h`
    pub fn provider_name(&self) -> String {
        format!("{}-{}", self.package, self.granularity.provider_suffix())
    }
}

/// The enabled (package, granularity) pairs for a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSelection {
    enabled: BTreeSet<PackageRequest>,
}

impl PackageSelection {
    /// Builds a selection from explicit pairs
    pub fn new(pairs: impl IntoIterator<Item = (Package, Granularity)>) -> Self {
        Self {
            enabled: pairs
                .into_iter()
                .map(|(package, granularity)| PackageRequest::new(package, granularity))
                .collect(),
        }
    }

    /// Whether nothing at all is enabled
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Whether a given pair is enabled
    pub fn contains(&self, package: Package, granularity: Granularity) -> bool {
        self.enabled
            .contains(&PackageRequest::new(package, granularity))
    }

    /// Enabled packages for one granularity, in provider order
    pub fn packages(&self, granularity: Granularity) -> Vec<Package> {
        self.enabled
            .iter()
            .filter(|r| r.granularity == granularity)
            .map(|r| r.package)
            .collect()
    }

    /// Enabled requests for one granularity
    pub fn requests(&self, granularity: Granularity) -> Vec<PackageRequest> {
        self.enabled
            .iter()
            .filter(|r| r.granularity == granularity)
            .copied()
            .collect()
    }

    /// Every enabled request
    pub fn all_requests(&self) -> Vec<PackageRequest> {
        self.enabled.iter().copied().collect()
    }

    /// Whether any package is enabled at this granularity
    pub fn has_granularity(&self, granularity: Granularity) -> bool {
        self.enabled.iter().any(|r| r.granularity == granularity)
    }
}

/// Time key of a normalized record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForecastTime {
    /// Provider-local hour for hourly rows
    Hour(NaiveDateTime),
    /// Provider-local date for daily rows
    Day(NaiveDate),
}

impl fmt::Display for ForecastTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastTime::Hour(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M")),
            ForecastTime::Day(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// A single output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric value, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Text value, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }
}

/// One published forecast row for one package at one granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    /// Hour or date of the row
    pub time: ForecastTime,
    /// Hours (hourly) or days (daily) ahead of the cycle start
    pub relative_offset: i64,
    /// Package-owned fields in output units
    pub fields: BTreeMap<String, FieldValue>,
    /// Predicted latitude for moving-vessel hourly rows
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub predicted_latitude: Option<f64>,
    /// Predicted longitude for moving-vessel hourly rows
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub predicted_longitude: Option<f64>,
    /// Set on rows assembled along the predicted track
    #[serde(default)]
    pub vessel_moving: bool,
}

impl NormalizedRecord {
    /// Numeric field lookup
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_f64)
    }

    /// Text field lookup
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_text)
    }
}
