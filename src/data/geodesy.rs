//! Great-circle navigation math for track prediction
//!
//! Spherical earth model with radius 6,371,000 m.
//!
//! - Latitude/longitude: decimal degrees
//! - Heading: radians true (0 = north, π/2 = east)
//! - Speed: meters per second
//! - Distance: meters

use chrono::Duration;

use super::Position;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per second in one knot
pub const KNOTS_TO_MPS: f64 = 0.514444;

/// Project the vessel position `hours_ahead` hours along its heading.
///
/// Assumes constant heading and speed and follows the great circle through
/// the origin. The returned timestamp is the origin's plus `hours_ahead`.
///
/// # Arguments
/// * `origin` - Current position
/// * `heading_rad` - True heading in radians
/// * `speed_mps` - Speed over ground in m/s
/// * `hours_ahead` - Hour offset to predict for
///
/// # Example
/// ```
/// use chrono::Utc;
/// use vesselcast::data::{predict_position, Position};
///
/// let origin = Position::new(0.0, 0.0, Utc::now());
/// // 10 knots due north for an hour is 10 arcminutes
/// let p = predict_position(&origin, 0.0, 5.14444, 1);
/// assert!((p.latitude - 0.1667).abs() < 1e-3);
/// ```
pub fn predict_position(
    origin: &Position,
    heading_rad: f64,
    speed_mps: f64,
    hours_ahead: u32,
) -> Position {
    if hours_ahead == 0 {
        return *origin;
    }

    let distance = speed_mps * f64::from(hours_ahead) * 3600.0;
    let angular = distance / EARTH_RADIUS_M;

    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * heading_rad.cos()).asin();
    let lon2 = lon1
        + (heading_rad.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    // Normalize longitude to -180..180
    let mut longitude = lon2.to_degrees();
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }

    Position {
        latitude: lat2.to_degrees(),
        longitude,
        timestamp: origin.timestamp + Duration::hours(i64::from(hours_ahead)),
    }
}

/// Whether speed over ground is strictly above a threshold given in knots.
///
/// A vessel exactly at the threshold is not moving.
pub fn is_moving(sog_mps: f64, threshold_knots: f64) -> bool {
    sog_mps > threshold_knots * KNOTS_TO_MPS
}

/// Great-circle distance between two positions in meters (haversine).
pub fn haversine_distance(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
