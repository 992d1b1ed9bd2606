//! Moving-vessel forecast assembly
//!
//! For each future hour the vessel's position is predicted along its
//! great-circle track, the provider is asked for that position, and the
//! single row matching that hour is kept. The per-hour rows are stitched into
//! one hourly series per package.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::normalize::{find_hour_row, normalize_row, truncate_to_hour};
use super::ForecastError;
use crate::data::{
    predict_position, FetchError, ForecastFetcher, ForecastTime, Granularity, NormalizedRecord, Package,
    PackageSelection, Position,
};

/// Hourly records per package, in hour order
pub type HourlySeries = BTreeMap<Package, Vec<NormalizedRecord>>;

/// A finished track
#[derive(Debug, Default)]
pub struct Assembly {
    pub series: HourlySeries,
    /// Provider fetches issued
    pub fetches: usize,
    /// Hours whose response had no usable hourly table
    pub shape_errors: Vec<ForecastError>,
}

/// An abandoned track
#[derive(Debug)]
pub struct AssemblyFailure {
    pub error: FetchError,
    /// Provider fetches issued, the failed one included
    pub fetches: usize,
}

/// Builds the hourly series along a predicted track
pub struct MovingForecastAssembler<'a> {
    fetcher: &'a dyn ForecastFetcher,
    selection: &'a PackageSelection,
    max_forecast_hours: u32,
    pacing: Duration,
}

impl<'a> MovingForecastAssembler<'a> {
    /// Creates an assembler
    ///
    /// # Arguments
    /// * `fetcher` - Provider fetch capability
    /// * `selection` - Enabled packages; only hourly ones are used
    /// * `max_forecast_hours` - Number of hours to predict, starting at 0
    /// * `pacing` - Delay between successive per-hour fetches
    pub fn new(
        fetcher: &'a dyn ForecastFetcher,
        selection: &'a PackageSelection,
        max_forecast_hours: u32,
        pacing: Duration,
    ) -> Self {
        Self {
            fetcher,
            selection,
            max_forecast_hours,
            pacing,
        }
    }

    /// Fetch and stitch one row per hour along the predicted track.
    ///
    /// Hours whose response has no row for the target hour are skipped. A
    /// response without an hourly time column is skipped too and recorded as
    /// a data shape error for each hourly package. Any fetch error aborts the
    /// whole assembly so nothing partial is returned.
    ///
    /// # Arguments
    /// * `origin` - Current vessel position
    /// * `heading_rad` - True heading in radians
    /// * `sog_mps` - Speed over ground in m/s
    /// * `now` - Cycle start time
    pub async fn assemble(
        &self,
        origin: &Position,
        heading_rad: f64,
        sog_mps: f64,
        now: DateTime<Utc>,
    ) -> Result<Assembly, AssemblyFailure> {
        let requests = self.selection.requests(Granularity::Hourly);
        let packages = self.selection.packages(Granularity::Hourly);
        let mut assembly = Assembly {
            series: packages.iter().map(|p| (*p, Vec::new())).collect(),
            ..Default::default()
        };

        if requests.is_empty() {
            return Ok(assembly);
        }

        let start_hour = truncate_to_hour(now.naive_utc()).and_utc();

        for hour in 0..self.max_forecast_hours {
            if hour > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let predicted = predict_position(origin, heading_rad, sog_mps, hour);
            debug!(
                hour,
                latitude = predicted.latitude,
                longitude = predicted.longitude,
                "fetching forecast at predicted position"
            );

            assembly.fetches += 1;
            let frame = self
                .fetcher
                .fetch_forecast(predicted.latitude, predicted.longitude, &requests)
                .await
                .map_err(|error| AssemblyFailure {
                    error,
                    fetches: assembly.fetches,
                })?;

            let target = frame.local_time(start_hour + chrono::Duration::hours(i64::from(hour)));
            let Some(table) = frame.table(Granularity::Hourly).filter(|t| t.time.is_some()) else {
                warn!(hour, "response has no hourly time column, skipping hour");
                assembly
                    .shape_errors
                    .extend(packages.iter().map(|package| ForecastError::DataShape {
                        package: *package,
                        granularity: Granularity::Hourly,
                    }));
                continue;
            };
            let Some(row) = find_hour_row(table, target) else {
                warn!(hour, %target, "no row for target hour, skipping hour");
                continue;
            };
            let Some(row_time) = table.hour_at(row) else {
                continue;
            };

            for package in &packages {
                let record = NormalizedRecord {
                    time: ForecastTime::Hour(row_time),
                    relative_offset: i64::from(hour),
                    fields: normalize_row(table, row, *package, Granularity::Hourly),
                    predicted_latitude: Some(predicted.latitude),
                    predicted_longitude: Some(predicted.longitude),
                    vessel_moving: true,
                };
                assembly.series.entry(*package).or_default().push(record);
            }
        }

        info!(
            hours = self.max_forecast_hours,
            rows = assembly.series.values().map(Vec::len).max().unwrap_or(0),
            fetches = assembly.fetches,
            "assembled moving-vessel forecast"
        );

        Ok(assembly)
    }
}
