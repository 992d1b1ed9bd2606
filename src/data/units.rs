//! Unit conversion from provider-native units to output units
//!
//! The provider reports Celsius, degrees, hectopascal, millimeters and
//! percent. Published values are Kelvin, radians, Pascal, meters and ratios.
//! Which conversion applies to a field is decided by its name, using an
//! ordered rule table where the first matching rule wins.

use std::f64::consts::PI;

/// Name of the Douglas sea state field, passed through with derived text
pub const DOUGLAS_SEASTATE: &str = "douglas_seastate";

/// Convert Celsius to Kelvin
pub fn celsius_to_kelvin(c: f64) -> f64 {
    c + 273.15
}

/// Convert degrees to radians
pub fn degrees_to_radians(d: f64) -> f64 {
    d * PI / 180.0
}

/// Convert hectopascal to Pascal
pub fn hectopascal_to_pascal(hpa: f64) -> f64 {
    hpa * 100.0
}

/// Convert millimeters to meters
pub fn millimeters_to_meters(mm: f64) -> f64 {
    mm / 1000.0
}

/// Convert a percentage (0-100) to a ratio (0-1)
pub fn percent_to_ratio(p: f64) -> f64 {
    p / 100.0
}

/// How a raw field is turned into an output value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    CelsiusToKelvin,
    DegreesToRadians,
    MillimetersToMeters,
    HectopascalToPascal,
    PercentToRatio,
    /// Unchanged, plus derived sea state descriptions
    SeaState,
    /// Unchanged
    PassThrough,
}

impl Conversion {
    /// Applies the conversion to a native-unit value
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Conversion::CelsiusToKelvin => celsius_to_kelvin(value),
            Conversion::DegreesToRadians => degrees_to_radians(value),
            Conversion::MillimetersToMeters => millimeters_to_meters(value),
            Conversion::HectopascalToPascal => hectopascal_to_pascal(value),
            Conversion::PercentToRatio => percent_to_ratio(value),
            Conversion::SeaState | Conversion::PassThrough => value,
        }
    }
}

type FieldPredicate = fn(&str) -> bool;

/// Rules in precedence order. Some names match several predicates
/// (`sea_surface_temperature`, `precipitation_probability`), so order matters.
const CONVERSION_RULES: [(FieldPredicate, Conversion); 6] = [
    (|name| name.contains("temperature"), Conversion::CelsiusToKelvin),
    (|name| name.contains("direction"), Conversion::DegreesToRadians),
    (
        |name| name == "precipitation" || name == "convective_precipitation",
        Conversion::MillimetersToMeters,
    ),
    (|name| name.contains("pressure"), Conversion::HectopascalToPascal),
    (
        |name| {
            name.contains("humidity") || name.contains("cloudcover") || name.ends_with("probability")
        },
        Conversion::PercentToRatio,
    ),
    (|name| name == DOUGLAS_SEASTATE, Conversion::SeaState),
];

/// Picks the conversion for a raw field name
///
/// # Arguments
/// * `field` - Raw provider field name
///
/// # Returns
/// The first matching rule's conversion, or `PassThrough`
pub fn conversion_for(field: &str) -> Conversion {
    CONVERSION_RULES
        .iter()
        .find(|(matches, _)| matches(field))
        .map(|(_, conversion)| *conversion)
        .unwrap_or(Conversion::PassThrough)
}
