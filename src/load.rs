use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::models::HeartRateZones;
use crate::zones::{ZoneCalculator, ZoneTimeDistribution};

/// Training load scoring settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Weight per minute for zones 1..=5
    pub zone_weights: [Decimal; 5],

    /// Weight per minute when no heart rate information exists
    pub default_intensity_weight: Decimal,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            zone_weights: [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)],
            default_intensity_weight: dec!(2.0),
        }
    }
}

/// How a load score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMethod {
    /// Zone minutes from heart rate samples
    ZoneTrimp,
    /// Whole duration at the zone of the reported average HR
    AverageHeartRate,
    /// Whole duration at the default intensity
    DurationEstimate,
}

/// Training load of a single activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub load: Decimal,
    pub method: LoadMethod,
}

/// Edwards-style TRIMP scoring
#[derive(Debug, Clone)]
pub struct LoadModel {
    config: LoadConfig,
    zones: HeartRateZones,
}

impl LoadModel {
    pub fn new(config: LoadConfig, zones: HeartRateZones) -> Self {
        LoadModel { config, zones }
    }

    /// Score one activity.
    ///
    /// load = Σ zone minutes × zone weight. Falls back to duration × the weight
    /// of the average HR zone, then to duration × the default weight.
    pub fn score(&self, snapshot: &MetricsSnapshot) -> LoadResult {
        let minutes = Decimal::from(snapshot.duration_seconds) / dec!(60);

        if let ZoneTimeDistribution::Measured { zone_seconds, .. } = &snapshot.hr_zones {
            let load: Decimal = zone_seconds
                .iter()
                .zip(self.config.zone_weights.iter())
                .map(|(seconds, weight)| Decimal::from(*seconds) / dec!(60) * *weight)
                .sum();
            return LoadResult {
                load: load.round_dp(2),
                method: LoadMethod::ZoneTrimp,
            };
        }

        if let Some(hr) = snapshot.avg_heart_rate.filter(|&hr| hr > 0) {
            let zone = ZoneCalculator::get_heart_rate_zone(hr, &self.zones);
            let weight = self.config.zone_weights[(zone - 1) as usize];
            return LoadResult {
                load: (minutes * weight).round_dp(2),
                method: LoadMethod::AverageHeartRate,
            };
        }

        LoadResult {
            load: (minutes * self.config.default_intensity_weight).round_dp(2),
            method: LoadMethod::DurationEstimate,
        }
    }
}
