//! Refresh decision for inbound position events and periodic ticks

use chrono::{DateTime, Duration, Utc};

use crate::data::{haversine_distance, Position};

/// Distance that forces a refresh, about five nautical miles
pub const REFRESH_DISTANCE_M: f64 = 9_260.0;

/// Decide whether a forecast refresh cycle must run.
///
/// Either trigger is sufficient: enough time has passed since the last
/// cycle, or the vessel has moved more than [`REFRESH_DISTANCE_M`] from the
/// position the last forecast was computed for.
///
/// # Arguments
/// * `last_position` - Position of the last completed cycle, if any
/// * `last_update` - When the last cycle completed, if ever
/// * `new_position` - Position just received
/// * `interval_minutes` - Time-based refresh interval
/// * `now` - Current time
pub fn should_refresh(
    last_position: Option<&Position>,
    last_update: Option<DateTime<Utc>>,
    new_position: &Position,
    interval_minutes: u64,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_update) = last_update else {
        return true;
    };

    let interval = Duration::minutes(interval_minutes.min(u64::from(u32::MAX)) as i64);
    if now - last_update >= interval {
        return true;
    }

    match last_position {
        Some(last) => haversine_distance(last, new_position) > REFRESH_DISTANCE_M,
        None => true,
    }
}
