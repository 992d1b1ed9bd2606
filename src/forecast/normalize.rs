//! Conversion of raw provider rows into package-scoped records
//!
//! A row is filtered through the package's owned field list and every kept
//! value is converted to output units. Rows are located by their timestamp,
//! never by array position, since provider series start at local midnight.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::warn;

use super::ForecastError;
use crate::data::packages::{douglas_sea_state_description, douglas_sea_state_simple, fields_for};
use crate::data::provider::FieldTable;
use crate::data::units::{conversion_for, Conversion};
use crate::data::{FieldValue, ForecastTime, Granularity, NormalizedRecord, Package, RawProviderFrame};

/// Derived terse sea state text
pub const SEA_STATE_SIMPLE_FIELD: &str = "douglas_seastate_simple";

/// Derived verbose sea state text
pub const SEA_STATE_DESCRIPTION_FIELD: &str = "douglas_seastate_description";

/// Convert one row of a table into the fields a package owns.
///
/// Missing and null values are left out. Text values pass through; numbers
/// go through the name-based unit conversion.
pub fn normalize_row(
    table: &FieldTable,
    row: usize,
    package: Package,
    granularity: Granularity,
) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();

    for &field in fields_for(package, granularity) {
        let Some(raw) = table.value(field, row) else {
            continue;
        };

        let number = match raw {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::String(s) => {
                fields.insert(field.to_string(), FieldValue::Text(s.clone()));
                continue;
            }
            _ => None,
        };
        let Some(value) = number else {
            continue;
        };

        let conversion = conversion_for(field);
        fields.insert(field.to_string(), FieldValue::Number(conversion.apply(value)));

        if conversion == Conversion::SeaState {
            fields.insert(
                SEA_STATE_SIMPLE_FIELD.to_string(),
                FieldValue::Text(douglas_sea_state_simple(value).to_string()),
            );
            fields.insert(
                SEA_STATE_DESCRIPTION_FIELD.to_string(),
                FieldValue::Text(douglas_sea_state_description(value).to_string()),
            );
        }
    }

    fields
}

/// Table for a granularity, or a data shape error when it has no time column
pub fn require_table(
    frame: &RawProviderFrame,
    package: Package,
    granularity: Granularity,
) -> Result<&FieldTable, ForecastError> {
    frame
        .table(granularity)
        .filter(|table| table.time.is_some())
        .ok_or(ForecastError::DataShape {
            package,
            granularity,
        })
}

/// Locate the row for a target hour by calendar year, month, day and hour
pub fn find_hour_row(table: &FieldTable, target: NaiveDateTime) -> Option<usize> {
    (0..table.len()).find(|&row| {
        table.hour_at(row).is_some_and(|t| {
            t.year() == target.year()
                && t.month() == target.month()
                && t.day() == target.day()
                && t.hour() == target.hour()
        })
    })
}

/// Hourly records starting at the row for `local_now`'s hour.
///
/// # Arguments
/// * `frame` - Provider response
/// * `package` - Package to extract
/// * `local_now` - Current time in the frame's local time
/// * `max_rows` - Maximum number of records
///
/// # Returns
/// * `Ok(records)` - Possibly empty if the series ends before now
/// * `Err(ForecastError::DataShape)` - If the frame has no hourly time column
pub fn hourly_records(
    frame: &RawProviderFrame,
    package: Package,
    local_now: NaiveDateTime,
    max_rows: usize,
) -> Result<Vec<NormalizedRecord>, ForecastError> {
    let table = require_table(frame, package, Granularity::Hourly)?;
    let current_hour = truncate_to_hour(local_now);

    let mut records = Vec::with_capacity(max_rows.min(table.len()));
    for row in 0..table.len() {
        if records.len() >= max_rows {
            break;
        }
        let Some(time) = table.hour_at(row) else {
            warn!(%package, row, "skipping hourly row with unreadable time");
            continue;
        };
        if time < current_hour {
            continue;
        }

        records.push(NormalizedRecord {
            time: ForecastTime::Hour(time),
            relative_offset: (time - current_hour).num_hours(),
            fields: normalize_row(table, row, package, Granularity::Hourly),
            predicted_latitude: None,
            predicted_longitude: None,
            vessel_moving: false,
        });
    }

    Ok(records)
}

/// Daily records starting at `local_now`'s date
pub fn daily_records(
    frame: &RawProviderFrame,
    package: Package,
    local_now: NaiveDateTime,
    max_rows: usize,
) -> Result<Vec<NormalizedRecord>, ForecastError> {
    let table = require_table(frame, package, Granularity::Daily)?;
    let today = local_now.date();

    let mut records = Vec::with_capacity(max_rows.min(table.len()));
    for row in 0..table.len() {
        if records.len() >= max_rows {
            break;
        }
        let Some(date) = table.date_at(row) else {
            warn!(%package, row, "skipping daily row with unreadable date");
            continue;
        };
        if date < today {
            continue;
        }

        records.push(NormalizedRecord {
            time: ForecastTime::Day(date),
            relative_offset: (date - today).num_days(),
            fields: normalize_row(table, row, package, Granularity::Daily),
            predicted_latitude: None,
            predicted_longitude: None,
            vessel_moving: false,
        });
    }

    Ok(records)
}

/// Drop minutes and seconds
pub fn truncate_to_hour(time: NaiveDateTime) -> NaiveDateTime {
    time.date()
        .and_hms_opt(time.hour(), 0, 0)
        .unwrap_or(time)
}
