//! Meteoblue package API client
//!
//! This module provides the fetch capability the forecast engine depends on,
//! and the raw frame type it returns. A frame holds provider-native values in
//! parallel arrays: one `time` column plus one column per field, for hourly
//! (`data_1h`) and daily (`data_day`) resolution.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{Granularity, PackageRequest};

/// Base URL for the Meteoblue API
pub const METEOBLUE_BASE_URL: &str = "https://my.meteoblue.com";

/// Errors that can occur when fetching forecast data
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Provider reported an error in the response body
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Forecast fetch capability
///
/// The engine treats every error uniformly; timeouts and transport details
/// belong to the implementation.
#[async_trait]
pub trait ForecastFetcher: Send + Sync {
    /// Fetch the given packages for one location
    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        packages: &[PackageRequest],
    ) -> Result<RawProviderFrame, FetchError>;
}

/// Location metadata returned with every frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    /// Offset of the frame's local time from UTC, in hours
    #[serde(default)]
    pub utc_timeoffset: f64,
    #[serde(default)]
    pub modelrun_utc: Option<String>,
}

/// One resolution's worth of columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldTable {
    /// Row timestamps in provider local time
    #[serde(default)]
    pub time: Option<Vec<String>>,
    /// Field name to per-row native values
    #[serde(flatten)]
    pub columns: BTreeMap<String, Vec<serde_json::Value>>,
}

impl FieldTable {
    /// Number of rows, zero without a time column
    pub fn len(&self) -> usize {
        self.time.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw value of a field in a row, if present and not null
    pub fn value(&self, field: &str, row: usize) -> Option<&serde_json::Value> {
        self.columns
            .get(field)
            .and_then(|column| column.get(row))
            .filter(|v| !v.is_null())
    }

    /// Row timestamp as an hour
    pub fn hour_at(&self, row: usize) -> Option<NaiveDateTime> {
        self.time
            .as_ref()
            .and_then(|t| t.get(row))
            .and_then(|s| parse_hour(s))
    }

    /// Row timestamp as a date
    pub fn date_at(&self, row: usize) -> Option<NaiveDate> {
        self.time
            .as_ref()
            .and_then(|t| t.get(row))
            .and_then(|s| parse_date(s))
    }
}

/// One provider response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProviderFrame {
    #[serde(default)]
    pub metadata: FrameMetadata,
    #[serde(default, rename = "data_1h")]
    pub hourly: Option<FieldTable>,
    #[serde(default, rename = "data_day")]
    pub daily: Option<FieldTable>,
}

impl RawProviderFrame {
    /// Column table for a granularity
    pub fn table(&self, granularity: Granularity) -> Option<&FieldTable> {
        match granularity {
            Granularity::Hourly => self.hourly.as_ref(),
            Granularity::Daily => self.daily.as_ref(),
        }
    }

    /// Converts a UTC instant to the frame's local wall-clock time
    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        let offset_secs = (self.metadata.utc_timeoffset * 3600.0).round() as i64;
        instant.naive_utc() + chrono::Duration::seconds(offset_secs)
    }
}

/// Body the provider sends instead of data when a request is rejected
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error_message: String,
}

/// Client for fetching forecast packages from Meteoblue
#[derive(Debug, Clone)]
pub struct MeteoblueClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl MeteoblueClient {
    /// Create a new client with a request timeout
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_key))
    }

    /// Create a new client with a custom HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: METEOBLUE_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Point the client at another base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the package request URL
    ///
    /// Packages are joined with `_`, e.g. `/packages/basic-1h_sea-1h`.
    /// Values are requested in m/s, Celsius, millimeters and degrees.
    pub fn build_url(&self, latitude: f64, longitude: f64, packages: &[PackageRequest]) -> String {
        let path = packages
            .iter()
            .map(PackageRequest::provider_name)
            .collect::<Vec<_>>()
            .join("_");

        format!(
            "{}/packages/{}?lat={}&lon={}&apikey={}&format=json&windspeed=ms-1&temperature=C&precipitationamount=mm&winddirection=degree",
            self.base_url, path, latitude, longitude, self.api_key
        )
    }

    /// Parse a response body into a frame
    pub fn parse_response(text: &str) -> Result<RawProviderFrame, FetchError> {
        if let Ok(error) = serde_json::from_str::<ProviderErrorBody>(text) {
            return Err(FetchError::Provider(error.error_message));
        }
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait]
impl ForecastFetcher for MeteoblueClient {
    async fn fetch_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        packages: &[PackageRequest],
    ) -> Result<RawProviderFrame, FetchError> {
        let url = self.build_url(latitude, longitude, packages);
        debug!(latitude, longitude, packages = packages.len(), "fetching forecast");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ProviderErrorBody>(&text) {
                return Err(FetchError::Provider(error.error_message));
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Self::parse_response(&text)
    }
}

/// Parse an hourly timestamp ("2024-07-15 14:00" or "2024-07-15T14:00")
pub fn parse_hour(time_str: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(time_str, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(time_str, "%Y-%m-%dT%H:%M"))
        .ok()
}

/// Parse a daily timestamp ("2024-07-15"), ignoring any time part
pub fn parse_date(time_str: &str) -> Option<NaiveDate> {
    let date_part = time_str.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
