//! Weather query adapter
//!
//! Read-only view over the published record store. Records of every enabled
//! package at the same index are merged and reshaped into the grouped
//! [`WeatherData`] schema. Values are already in output units, so nothing is
//! converted here and nothing is fetched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalize::SEA_STATE_DESCRIPTION_FIELD;
use super::store::RecordStore;
use crate::data::{Granularity, NormalizedRecord, Package, PackageSelection};

/// Extra indices probed past the requested count
const PROBE_SLACK: usize = 10;

/// Kind of forecast a host asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Hourly forecasts
    Point,
    /// Daily forecasts
    Daily,
}

impl QueryKind {
    pub fn granularity(self) -> Granularity {
        match self {
            QueryKind::Point => Granularity::Hourly,
            QueryKind::Daily => Granularity::Daily,
        }
    }
}

/// Temperatures in Kelvin
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feels_like: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative_humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

/// Wind speed in m/s, direction in radians
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_true: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction_true: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gust: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_max: Option<f64>,
}

/// Sea surface and wave conditions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_significant_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swell_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swell_period: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swell_direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sea_state: Option<f64>,
}

/// Sun times as given by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SunData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunrise: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sunshine_duration: Option<f64>,
}

/// Surface current, drift in m/s and set in radians
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_true: Option<f64>,
}

/// One forecast in the external grouped schema
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherData {
    pub date: String,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<TemperatureData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind: Option<WindData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water: Option<WaterData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sun: Option<SunData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<CurrentData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_longitude: Option<f64>,
}

/// Empty groups are omitted rather than serialized as `{}`
fn non_empty<T: Default + PartialEq>(group: T) -> Option<T> {
    (group != T::default()).then_some(group)
}

/// First present numeric field among `names`
fn first(record: &NormalizedRecord, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| record.number(name))
}

impl WeatherData {
    /// Reshape a merged record
    pub fn from_record(record: &NormalizedRecord, kind: QueryKind) -> Self {
        let temperature = TemperatureData {
            air: first(record, &["temperature", "temperature_mean"]),
            feels_like: first(record, &["felttemperature"]),
            minimum: first(record, &["temperature_min"]),
            maximum: first(record, &["temperature_max"]),
            relative_humidity: first(record, &["relativehumidity", "relativehumidity_mean"]),
            pressure: first(record, &["sealevelpressure", "sealevelpressure_mean"]),
        };
        let wind = WindData {
            speed_true: first(record, &["windspeed", "windspeed_mean"]),
            direction_true: first(record, &["winddirection"]),
            gust: first(record, &["gust", "gust_max"]),
            speed_max: first(record, &["windspeed_max"]),
        };
        let water = WaterData {
            temperature: first(
                record,
                &["sea_surface_temperature", "sea_surface_temperature_mean"],
            ),
            wave_significant_height: first(record, &["significantwaveheight"]),
            wave_period: first(record, &["mean_waveperiod"]),
            wave_direction: first(record, &["mean_wavedirection"]),
            swell_height: first(record, &["swell_significantheight"]),
            swell_period: first(record, &["swell_meanperiod"]),
            swell_direction: first(record, &["swell_meandirection"]),
            sea_state: first(record, &["douglas_seastate"]),
        };
        let sun = SunData {
            sunrise: record.text("sunrise").map(str::to_string),
            sunset: record.text("sunset").map(str::to_string),
            sunshine_duration: first(record, &["sunshinetime"]),
        };
        let current = CurrentData {
            drift: first(record, &["currentvelocity"]),
            set_true: first(record, &["currentdirection"]),
        };

        Self {
            date: record.time.to_string(),
            kind,
            description: record.text(SEA_STATE_DESCRIPTION_FIELD).map(str::to_string),
            temperature: non_empty(temperature),
            wind: non_empty(wind),
            water: non_empty(water),
            sun: non_empty(sun),
            current: non_empty(current),
            predicted_latitude: record.predicted_latitude,
            predicted_longitude: record.predicted_longitude,
        }
    }
}

/// Merge the records of all packages published at the same index
fn merge_records(parts: Vec<NormalizedRecord>) -> Option<NormalizedRecord> {
    let mut parts = parts.into_iter();
    let mut merged = parts.next()?;
    for part in parts {
        for (name, value) in part.fields {
            merged.fields.entry(name).or_insert(value);
        }
        merged.predicted_latitude = merged.predicted_latitude.or(part.predicted_latitude);
        merged.predicted_longitude = merged.predicted_longitude.or(part.predicted_longitude);
        merged.vessel_moving |= part.vessel_moving;
    }
    Some(merged)
}

/// Probe the store from index 0 until an index has no record, reading at
/// most `max_count + 10` indices. Returns every merged record found.
fn probe_records(
    store: &RecordStore,
    packages: &[Package],
    granularity: Granularity,
    max_count: usize,
) -> Vec<NormalizedRecord> {
    let cap = max_count.saturating_add(PROBE_SLACK);
    let mut records = Vec::new();
    for index in 0..cap {
        let parts = packages
            .iter()
            .filter_map(|package| store.get(*package, granularity, index))
            .collect();
        match merge_records(parts) {
            Some(record) => records.push(record),
            None => break,
        }
    }
    records
}

/// Up to `max_count` merged records from the front of the store.
///
/// A granularity with no enabled package yields nothing without reading the
/// store.
pub fn collect_records(
    store: &RecordStore,
    selection: &PackageSelection,
    granularity: Granularity,
    max_count: usize,
) -> Vec<NormalizedRecord> {
    let packages = selection.packages(granularity);
    if packages.is_empty() {
        return Vec::new();
    }

    let mut records = probe_records(store, &packages, granularity, max_count);
    debug!(%granularity, available = records.len(), requested = max_count, "probed record store");
    records.truncate(max_count);
    records
}

/// Stateless query view over a record store
#[derive(Debug, Clone)]
pub struct WeatherQuery {
    store: RecordStore,
    selection: PackageSelection,
}

impl WeatherQuery {
    pub fn new(store: RecordStore, selection: PackageSelection) -> Self {
        Self { store, selection }
    }

    /// Up to `count` forecasts of the given kind
    pub fn forecasts(&self, kind: QueryKind, count: usize) -> Vec<WeatherData> {
        collect_records(&self.store, &self.selection, kind.granularity(), count)
            .iter()
            .map(|record| WeatherData::from_record(record, kind))
            .collect()
    }
}
