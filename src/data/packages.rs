//! Package field classification
//!
//! Every forecast package owns a fixed, ordered list of raw provider fields,
//! separately for hourly and daily data. Only owned fields are ever emitted
//! for a package, even when the provider frame carries more columns. This
//! keeps wave heights out of `basic` and air temperature out of `sea`.

use super::{Granularity, Package};

const BASIC_HOURLY: &[&str] = &[
    "temperature",
    "felttemperature",
    "windspeed",
    "winddirection",
    "relativehumidity",
    "sealevelpressure",
    "precipitation",
    "convective_precipitation",
    "precipitation_probability",
    "snowfraction",
    "pictocode",
    "rainspot",
    "isdaylight",
    "uvindex",
];

const WIND_HOURLY: &[&str] = &[
    "windspeed",
    "winddirection",
    "gust",
    "windspeed_80m",
    "winddirection_80m",
    "airdensity",
    "surfaceairpressure",
];

const SEA_HOURLY: &[&str] = &[
    "sea_surface_temperature",
    "significantwaveheight",
    "mean_waveperiod",
    "mean_wavedirection",
    "windwave_height",
    "windwave_meanperiod",
    "windwave_direction",
    "swell_significantheight",
    "swell_meanperiod",
    "swell_meandirection",
    "douglas_seastate",
    "currentvelocity",
    "currentdirection",
];

const SOLAR_HOURLY: &[&str] = &[
    "ghi_instant",
    "dni_instant",
    "dif_instant",
    "ghi_backwards",
    "sunshinetime",
    "zenithangle",
];

const TREND_HOURLY: &[&str] = &[
    "temperature",
    "felttemperature",
    "windspeed",
    "winddirection",
    "precipitation",
    "precipitation_probability",
    "sealevelpressure",
    "relativehumidity",
    "pictocode",
];

const CLOUDS_HOURLY: &[&str] = &[
    "totalcloudcover",
    "lowclouds",
    "midclouds",
    "highclouds",
    "visibility",
    "fog_probability",
    "sunshinetime",
];

const BASIC_DAILY: &[&str] = &[
    "temperature_max",
    "temperature_min",
    "temperature_mean",
    "felttemperature_max",
    "felttemperature_min",
    "windspeed_max",
    "windspeed_min",
    "windspeed_mean",
    "winddirection",
    "relativehumidity_max",
    "relativehumidity_min",
    "relativehumidity_mean",
    "sealevelpressure_max",
    "sealevelpressure_min",
    "sealevelpressure_mean",
    "precipitation",
    "convective_precipitation",
    "precipitation_probability",
    "predictability",
    "pictocode",
    "uvindex",
];

const WIND_DAILY: &[&str] = &[
    "windspeed_max",
    "windspeed_min",
    "windspeed_mean",
    "winddirection",
    "gust_max",
    "gust_min",
    "gust_mean",
];

// The provider has no daily wave fields
const SEA_DAILY: &[&str] = &[
    "sea_surface_temperature_min",
    "sea_surface_temperature_max",
    "sea_surface_temperature_mean",
];

const SOLAR_DAILY: &[&str] = &["ghi_total", "dni_total", "dif_total", "sunshinetime", "sunrise", "sunset"];

const TREND_DAILY: &[&str] = &[
    "temperature_max",
    "temperature_min",
    "precipitation",
    "precipitation_probability",
    "windspeed_max",
    "winddirection",
    "pictocode",
];

const CLOUDS_DAILY: &[&str] = &[
    "totalcloudcover_max",
    "totalcloudcover_min",
    "totalcloudcover_mean",
    "lowclouds_mean",
    "midclouds_mean",
    "highclouds_mean",
    "visibility_mean",
    "fog_probability",
    "sunshinetime",
];

/// Raw fields owned by a package at a granularity, in output order
pub fn fields_for(package: Package, granularity: Granularity) -> &'static [&'static str] {
    match (granularity, package) {
        (Granularity::Hourly, Package::Basic) => BASIC_HOURLY,
        (Granularity::Hourly, Package::Wind) => WIND_HOURLY,
        (Granularity::Hourly, Package::Sea) => SEA_HOURLY,
        (Granularity::Hourly, Package::Solar) => SOLAR_HOURLY,
        (Granularity::Hourly, Package::Trend) => TREND_HOURLY,
        (Granularity::Hourly, Package::Clouds) => CLOUDS_HOURLY,
        (Granularity::Daily, Package::Basic) => BASIC_DAILY,
        (Granularity::Daily, Package::Wind) => WIND_DAILY,
        (Granularity::Daily, Package::Sea) => SEA_DAILY,
        (Granularity::Daily, Package::Solar) => SOLAR_DAILY,
        (Granularity::Daily, Package::Trend) => TREND_DAILY,
        (Granularity::Daily, Package::Clouds) => CLOUDS_DAILY,
    }
}

/// Whether a package owns a raw field at a granularity
pub fn owns_field(package: Package, granularity: Granularity, field: &str) -> bool {
    fields_for(package, granularity).contains(&field)
}

/// Fallback text for sea states outside 0-9
pub const UNKNOWN_SEA_STATE: &str = "Unknown";

const SEA_STATE_SIMPLE: [&str; 10] = [
    "Calm (glassy)",
    "Calm (rippled)",
    "Smooth",
    "Slight",
    "Moderate",
    "Rough",
    "Very rough",
    "High",
    "Very high",
    "Phenomenal",
];

const SEA_STATE_DESCRIPTION: [&str; 10] = [
    "Calm (glassy), no waves",
    "Calm (rippled), waves 0 to 0.1 m",
    "Smooth (wavelets), waves 0.1 to 0.5 m",
    "Slight, waves 0.5 to 1.25 m",
    "Moderate, waves 1.25 to 2.5 m",
    "Rough, waves 2.5 to 4 m",
    "Very rough, waves 4 to 6 m",
    "High, waves 6 to 9 m",
    "Very high, waves 9 to 14 m",
    "Phenomenal, waves over 14 m",
];

fn sea_state_index(value: f64) -> Option<usize> {
    let rounded = value.round();
    if (0.0..=9.0).contains(&rounded) {
        Some(rounded as usize)
    } else {
        None
    }
}

/// Terse Douglas sea state name, e.g. `"Moderate"` for 4
pub fn douglas_sea_state_simple(value: f64) -> &'static str {
    sea_state_index(value)
        .map(|i| SEA_STATE_SIMPLE[i])
        .unwrap_or(UNKNOWN_SEA_STATE)
}

/// Douglas sea state name with its wave height band
pub fn douglas_sea_state_description(value: f64) -> &'static str {
    sea_state_index(value)
        .map(|i| SEA_STATE_DESCRIPTION[i])
        .unwrap_or(UNKNOWN_SEA_STATE)
}
