use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{CalculationError, DataError};

/// Activity types delivered by the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sport {
    Running,
    TrailRunning,
    TreadmillRunning,
    TrackRunning,
    Walking,
    Hiking,
    Other,
}

impl Sport {
    /// Map a data-source activity type key (e.g. `trail_running`) to a sport
    pub fn from_type_key(key: &str) -> Self {
        match key.to_lowercase().as_str() {
            "running" | "street_running" | "run" => Sport::Running,
            "trail_running" => Sport::TrailRunning,
            "treadmill_running" | "indoor_running" => Sport::TreadmillRunning,
            "track_running" => Sport::TrackRunning,
            "walking" => Sport::Walking,
            "hiking" => Sport::Hiking,
            _ => Sport::Other,
        }
    }

    /// Whether efforts of this sport count toward race predictions
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Sport::Running | Sport::TrailRunning | Sport::TreadmillRunning | Sport::TrackRunning
        )
    }
}

/// Unit preferences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    /// Length of the display distance unit in meters
    pub fn unit_meters(&self) -> Decimal {
        match self {
            Units::Metric => dec!(1000),
            Units::Imperial => dec!(1609.344),
        }
    }

    pub fn distance_label(&self) -> &'static str {
        match self {
            Units::Metric => "km",
            Units::Imperial => "mi",
        }
    }

    pub fn elevation_label(&self) -> &'static str {
        match self {
            Units::Metric => "m",
            Units::Imperial => "ft",
        }
    }

    /// Convert meters of elevation into the display unit
    pub fn elevation_from_meters(&self, meters: Decimal) -> Decimal {
        match self {
            Units::Metric => meters,
            Units::Imperial => meters * dec!(3.28084),
        }
    }
}

/// Language the coaching text should be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ko")]
    Korean,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Korean => "ko",
        }
    }

    /// Parse a language code, falling back to English for unknown codes
    pub fn from_code(code: &str) -> Self {
        match code.to_lowercase().as_str() {
            "ko" | "kr" | "korean" => Language::Korean,
            _ => Language::English,
        }
    }
}

/// Athlete profile supplied at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    /// Maximum heart rate
    pub max_hr: u16,

    /// Resting heart rate; enables heart-rate-reserve zones when present
    pub resting_hr: Option<u16>,

    /// Preferred units (metric/imperial)
    #[serde(default)]
    pub preferred_units: Units,

    /// Language for coaching responses
    #[serde(default)]
    pub language: Language,
}

impl AthleteProfile {
    pub fn new(max_hr: u16) -> Self {
        AthleteProfile {
            max_hr,
            resting_hr: None,
            preferred_units: Units::Metric,
            language: Language::English,
        }
    }

    pub fn with_resting_hr(mut self, resting_hr: u16) -> Self {
        self.resting_hr = Some(resting_hr);
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.preferred_units = units;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    /// Check that heart-rate values are physiologically plausible
    pub fn validate(&self) -> Result<(), CalculationError> {
        if !(100..=230).contains(&self.max_hr) {
            return Err(CalculationError::InvalidParameter {
                calculation: "athlete profile".to_string(),
                parameter: "max_hr".to_string(),
                value: self.max_hr.to_string(),
            });
        }
        if let Some(resting) = self.resting_hr {
            if resting < 25 || resting >= self.max_hr {
                return Err(CalculationError::InvalidParameter {
                    calculation: "athlete profile".to_string(),
                    parameter: "resting_hr".to_string(),
                    value: resting.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Basis used to derive heart rate zone boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HrZoneBasis {
    /// Percentage of heart rate reserve (max - resting), Karvonen
    HeartRateReserve,
    /// Percentage of maximum heart rate
    PercentOfMax,
}

/// Heart rate training zones (upper bounds in bpm, inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateZones {
    pub zone1_max: u16, // Recovery
    pub zone2_max: u16, // Aerobic base
    pub zone3_max: u16, // Tempo
    pub zone4_max: u16, // Threshold
    pub zone5_max: u16, // VO2 Max
    pub basis: HrZoneBasis,
}

/// Immutable raw activity record as delivered by the data source.
///
/// Sample series are parallel to `timestamps` (seconds from start). Missing
/// series are `None`; a heart rate of 0 marks a sensor dropout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Unique identifier from the data source
    pub id: String,

    /// Local start time
    pub start_time: NaiveDateTime,

    /// Activity type
    pub sport: Sport,

    /// Elapsed duration in seconds
    pub duration_seconds: u32,

    /// Total distance in meters
    pub distance_meters: Decimal,

    /// Optional title given by the athlete
    pub name: Option<String>,

    /// Sample offsets in seconds from the start
    pub timestamps: Vec<u32>,

    /// Heart rate samples in bpm
    pub heart_rate: Option<Vec<u16>>,

    /// Speed samples in meters per second
    pub speed: Option<Vec<Decimal>>,

    /// Altitude samples in meters
    pub altitude: Option<Vec<Decimal>>,

    /// Average heart rate reported by the device
    pub avg_heart_rate: Option<u16>,

    /// Maximum heart rate reported by the device
    pub max_heart_rate: Option<u16>,

    /// Calories reported by the device
    pub calories: Option<u16>,

    /// Elevation gain reported by the device, used when no altitude samples exist
    pub reported_elevation_gain: Option<Decimal>,
}

impl Activity {
    /// Create a summary-only activity without sample series
    pub fn summary(
        id: impl Into<String>,
        start_time: NaiveDateTime,
        duration_seconds: u32,
        distance_meters: Decimal,
    ) -> Self {
        Activity {
            id: id.into(),
            start_time,
            sport: Sport::Running,
            duration_seconds,
            distance_meters,
            name: None,
            timestamps: Vec::new(),
            heart_rate: None,
            speed: None,
            altitude: None,
            avg_heart_rate: None,
            max_heart_rate: None,
            calories: None,
            reported_elevation_gain: None,
        }
    }

    pub fn with_sport(mut self, sport: Sport) -> Self {
        self.sport = sport;
        self
    }

    pub fn with_timestamps(mut self, timestamps: Vec<u32>) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_heart_rate(mut self, heart_rate: Vec<u16>) -> Self {
        self.heart_rate = Some(heart_rate);
        self
    }

    pub fn with_speed(mut self, speed: Vec<Decimal>) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: Vec<Decimal>) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_avg_heart_rate(mut self, avg_heart_rate: u16) -> Self {
        self.avg_heart_rate = Some(avg_heart_rate);
        self
    }

    /// Calendar date of the start time
    pub fn start_date(&self) -> NaiveDate {
        self.start_time.date()
    }

    /// Structural validation; a failing activity is skipped by batch computations
    pub fn validate(&self) -> Result<(), DataError> {
        if self.id.trim().is_empty() {
            return Err(DataError::MissingId);
        }
        if self.duration_seconds == 0 {
            return Err(DataError::NonPositiveDuration {
                activity_id: self.id.clone(),
            });
        }
        if self.distance_meters <= Decimal::ZERO {
            return Err(DataError::NonPositiveDistance {
                activity_id: self.id.clone(),
                distance: self.distance_meters.to_string(),
            });
        }

        let expected = self.timestamps.len();
        let series = [
            ("heart_rate", self.heart_rate.as_ref().map(Vec::len)),
            ("speed", self.speed.as_ref().map(Vec::len)),
            ("altitude", self.altitude.as_ref().map(Vec::len)),
        ];
        for (name, len) in series {
            if let Some(actual) = len {
                if actual != expected {
                    return Err(DataError::SeriesLengthMismatch {
                        activity_id: self.id.clone(),
                        series: name,
                        expected,
                        actual,
                    });
                }
            }
        }

        if let Some(index) = self
            .timestamps
            .windows(2)
            .position(|pair| pair[1] < pair[0])
        {
            return Err(DataError::NonMonotonicTimestamps {
                activity_id: self.id.clone(),
                index: index + 1,
            });
        }

        Ok(())
    }
}
