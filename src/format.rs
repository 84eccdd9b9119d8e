//! Human-readable rendering of paces, durations and distances

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Units;

/// Render a pace given in min/km as `m:ss` per display unit, `--:--` when undefined
pub fn format_pace(pace_min_per_km: Option<Decimal>, units: Units) -> String {
    let total_seconds = pace_min_per_km
        .filter(|pace| *pace > Decimal::ZERO)
        .and_then(|pace| pace.checked_mul(units.unit_meters()))
        .and_then(|pace| pace.checked_mul(dec!(0.06)))
        .and_then(|seconds| seconds.round().to_u64());
    match total_seconds {
        Some(total) => format!("{}:{:02}", total / 60, total % 60),
        None => "--:--".to_string(),
    }
}

/// Pace with its unit suffix, e.g. `5:00/km`
pub fn format_pace_with_unit(pace_min_per_km: Option<Decimal>, units: Units) -> String {
    format!(
        "{}/{}",
        format_pace(pace_min_per_km, units),
        units.distance_label()
    )
}

/// Render seconds as `h:mm:ss`, or `m:ss` under an hour
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Distance in the display unit with two decimals, e.g. `5.00 km`
pub fn format_distance(meters: Decimal, units: Units) -> String {
    let value = (meters / units.unit_meters()).round_dp(2);
    format!("{:.2} {}", value, units.distance_label())
}

/// Elevation in the display unit without decimals
pub fn format_elevation(meters: Decimal, units: Units) -> String {
    let value = units.elevation_from_meters(meters).round();
    format!("{} {}", value, units.elevation_label())
}
