use crate::models::{AthleteProfile, HeartRateZones, HrZoneBasis};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Errors that can occur during zone calculations
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("Invalid threshold value: {0}")]
    InvalidThreshold(String),
    #[error("Calculation error: {0}")]
    CalculationError(String),
}

/// Zone upper bounds as a fraction of heart rate reserve or of max HR.
/// Zone 5 covers everything above the last bound.
const ZONE_UPPER_FRACTIONS: [Decimal; 4] = [dec!(0.60), dec!(0.70), dec!(0.80), dec!(0.90)];

/// Zones counted as aerobic for efficiency calculations
pub const AEROBIC_ZONES: std::ops::RangeInclusive<u8> = 1..=2;

/// Zone calculation utilities and algorithms
pub struct ZoneCalculator;

impl ZoneCalculator {
    /// Calculate heart rate zones for an athlete.
    ///
    /// Uses heart rate reserve when resting HR is known, percent of max otherwise:
    /// - Z1: < 60% (Recovery)
    /// - Z2: 60-70% (Aerobic Base)
    /// - Z3: 70-80% (Tempo)
    /// - Z4: 80-90% (Threshold)
    /// - Z5: 90%+ (VO2 Max)
    pub fn heart_rate_zones(profile: &AthleteProfile) -> Result<HeartRateZones, ZoneError> {
        Self::validate_heart_rate(profile.max_hr, "Max HR")?;

        match profile.resting_hr {
            Some(resting) => {
                Self::validate_heart_rate(resting, "Resting HR")?;
                if resting >= profile.max_hr {
                    return Err(ZoneError::InvalidThreshold(format!(
                        "Resting HR {} must be below max HR {}",
                        resting, profile.max_hr
                    )));
                }
                Self::zones_from_reserve(profile.max_hr, resting)
            }
            None => Self::zones_from_max(profile.max_hr),
        }
    }

    fn zones_from_reserve(max_hr: u16, resting_hr: u16) -> Result<HeartRateZones, ZoneError> {
        let reserve = Decimal::from(max_hr - resting_hr);
        let resting = Decimal::from(resting_hr);
        let bound = |fraction: Decimal| Self::round_bpm(resting + reserve * fraction);

        Ok(HeartRateZones {
            zone1_max: bound(ZONE_UPPER_FRACTIONS[0])?,
            zone2_max: bound(ZONE_UPPER_FRACTIONS[1])?,
            zone3_max: bound(ZONE_UPPER_FRACTIONS[2])?,
            zone4_max: bound(ZONE_UPPER_FRACTIONS[3])?,
            zone5_max: max_hr,
            basis: HrZoneBasis::HeartRateReserve,
        })
    }

    fn zones_from_max(max_hr: u16) -> Result<HeartRateZones, ZoneError> {
        let max = Decimal::from(max_hr);
        let bound = |fraction: Decimal| Self::round_bpm(max * fraction);

        Ok(HeartRateZones {
            zone1_max: bound(ZONE_UPPER_FRACTIONS[0])?,
            zone2_max: bound(ZONE_UPPER_FRACTIONS[1])?,
            zone3_max: bound(ZONE_UPPER_FRACTIONS[2])?,
            zone4_max: bound(ZONE_UPPER_FRACTIONS[3])?,
            zone5_max: max_hr,
            basis: HrZoneBasis::PercentOfMax,
        })
    }

    /// Determine which heart rate zone a given HR falls into
    pub fn get_heart_rate_zone(hr: u16, zones: &HeartRateZones) -> u8 {
        if hr <= zones.zone1_max {
            1
        } else if hr <= zones.zone2_max {
            2
        } else if hr <= zones.zone3_max {
            3
        } else if hr <= zones.zone4_max {
            4
        } else {
            5
        }
    }

    pub fn is_aerobic(hr: u16, zones: &HeartRateZones) -> bool {
        AEROBIC_ZONES.contains(&Self::get_heart_rate_zone(hr, zones))
    }

    fn round_bpm(value: Decimal) -> Result<u16, ZoneError> {
        value
            .round()
            .to_u16()
            .ok_or_else(|| ZoneError::CalculationError(format!("{} is outside the bpm range", value)))
    }

    fn validate_heart_rate(hr: u16, field_name: &str) -> Result<(), ZoneError> {
        if !(25..=230).contains(&hr) {
            return Err(ZoneError::InvalidThreshold(format!(
                "{} must be between 25 and 230 bpm, got {}",
                field_name, hr
            )));
        }
        Ok(())
    }
}

/// Time spent in each heart rate zone for one activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneTimeDistribution {
    /// No usable heart rate samples; never reported as zero time
    Unknown,
    Measured {
        /// Seconds in zones 1..=5
        zone_seconds: [u32; 5],
        /// Seconds covered by valid heart rate samples
        covered_seconds: u32,
        basis: HrZoneBasis,
    },
}

impl ZoneTimeDistribution {
    pub fn is_known(&self) -> bool {
        matches!(self, ZoneTimeDistribution::Measured { .. })
    }

    pub fn zone_seconds(&self) -> Option<[u32; 5]> {
        match self {
            ZoneTimeDistribution::Measured { zone_seconds, .. } => Some(*zone_seconds),
            ZoneTimeDistribution::Unknown => None,
        }
    }

    pub fn covered_seconds(&self) -> Option<u32> {
        match self {
            ZoneTimeDistribution::Measured {
                covered_seconds, ..
            } => Some(*covered_seconds),
            ZoneTimeDistribution::Unknown => None,
        }
    }

    /// Share of covered time per zone, in percent
    pub fn percentages(&self) -> Option<[Decimal; 5]> {
        let (zone_seconds, covered) = match self {
            ZoneTimeDistribution::Measured {
                zone_seconds,
                covered_seconds,
                ..
            } => (zone_seconds, *covered_seconds),
            ZoneTimeDistribution::Unknown => return None,
        };
        let mut percentages = [Decimal::ZERO; 5];
        for (slot, seconds) in percentages.iter_mut().zip(zone_seconds) {
            *slot = calculate_percentage(*seconds, covered);
        }
        Some(percentages)
    }
}

/// Zone distribution analysis utilities
pub struct ZoneAnalyzer;

impl ZoneAnalyzer {
    /// Attribute each sample interval `[t[i-1], t[i])` to the zone of `hr[i-1]`.
    ///
    /// Intervals starting on a dropout (0 bpm) are not covered. Zone seconds
    /// always sum to the covered seconds.
    pub fn time_in_zones(
        timestamps: &[u32],
        heart_rate: &[u16],
        zones: &HeartRateZones,
    ) -> ZoneTimeDistribution {
        let mut zone_seconds = [0u32; 5];
        let mut covered_seconds = 0u32;

        for (i, pair) in timestamps.windows(2).enumerate() {
            let hr = match heart_rate.get(i) {
                Some(&hr) if hr > 0 => hr,
                _ => continue,
            };
            let dt = pair[1].saturating_sub(pair[0]);
            let zone = ZoneCalculator::get_heart_rate_zone(hr, zones);
            zone_seconds[(zone - 1) as usize] += dt;
            covered_seconds += dt;
        }

        if covered_seconds == 0 {
            return ZoneTimeDistribution::Unknown;
        }

        ZoneTimeDistribution::Measured {
            zone_seconds,
            covered_seconds,
            basis: zones.basis,
        }
    }
}

fn calculate_percentage(count: u32, total: u32) -> Decimal {
    if total == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(count) / Decimal::from(total)) * dec!(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn create_test_profile() -> AthleteProfile {
        AthleteProfile::new(190).with_resting_hr(50)
    }

    #[test]
    fn test_hr_zones_from_reserve() {
        let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();

        // Reserve = 140 bpm
        assert_eq!(zones.zone1_max, 134); // 50 + 140 * 0.60 = 134
        assert_eq!(zones.zone2_max, 148); // 50 + 140 * 0.70 = 148
        assert_eq!(zones.zone3_max, 162); // 50 + 140 * 0.80 = 162
        assert_eq!(zones.zone4_max, 176); // 50 + 140 * 0.90 = 176
        assert_eq!(zones.zone5_max, 190);
        assert_eq!(zones.basis, HrZoneBasis::HeartRateReserve);
    }

    #[test]
    fn test_hr_zones_from_max_hr() {
        let profile = AthleteProfile::new(190);
        let zones = ZoneCalculator::heart_rate_zones(&profile).unwrap();

        assert_eq!(zones.zone1_max, 114); // 190 * 0.60 = 114
        assert_eq!(zones.zone2_max, 133); // 190 * 0.70 = 133
        assert_eq!(zones.zone3_max, 152); // 190 * 0.80 = 152
        assert_eq!(zones.zone4_max, 171); // 190 * 0.90 = 171
        assert_eq!(zones.basis, HrZoneBasis::PercentOfMax);
    }

    #[test]
    fn test_invalid_threshold_validation() {
        assert!(ZoneCalculator::heart_rate_zones(&AthleteProfile::new(20)).is_err());
        assert!(ZoneCalculator::heart_rate_zones(&AthleteProfile::new(250)).is_err());
        let inverted = AthleteProfile::new(150).with_resting_hr(160);
        assert!(ZoneCalculator::heart_rate_zones(&inverted).is_err());
    }

    #[test]
    fn test_zone_detection() {
        let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();

        assert_eq!(ZoneCalculator::get_heart_rate_zone(120, &zones), 1);
        assert_eq!(ZoneCalculator::get_heart_rate_zone(140, &zones), 2);
        assert_eq!(ZoneCalculator::get_heart_rate_zone(155, &zones), 3);
        assert_eq!(ZoneCalculator::get_heart_rate_zone(170, &zones), 4);
        assert_eq!(ZoneCalculator::get_heart_rate_zone(185, &zones), 5);
        assert_eq!(ZoneCalculator::get_heart_rate_zone(200, &zones), 5);
        assert!(ZoneCalculator::is_aerobic(140, &zones));
        assert!(!ZoneCalculator::is_aerobic(155, &zones));
    }

    #[test]
    fn test_time_in_zones() {
        let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();
        let timestamps = vec![0, 10, 20, 30, 45];
        let heart_rate = vec![120, 140, 155, 185, 185];

        let distribution = ZoneAnalyzer::time_in_zones(&timestamps, &heart_rate, &zones);

        assert_eq!(distribution.zone_seconds(), Some([10, 10, 10, 0, 15]));
        assert_eq!(distribution.covered_seconds(), Some(45));
        let percentages = distribution.percentages().unwrap();
        assert_eq!(percentages.iter().copied().sum::<Decimal>().round_dp(6), dec!(100));
    }

    #[test]
    fn test_dropouts_are_not_covered() {
        let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();
        let timestamps = vec![0, 10, 20, 30];
        let heart_rate = vec![120, 0, 0, 150];

        let distribution = ZoneAnalyzer::time_in_zones(&timestamps, &heart_rate, &zones);
        assert_eq!(distribution.covered_seconds(), Some(10));
    }

    #[test]
    fn test_all_dropouts_are_unknown() {
        let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();
        let distribution = ZoneAnalyzer::time_in_zones(&[0, 10, 20], &[0, 0, 0], &zones);
        assert_eq!(distribution, ZoneTimeDistribution::Unknown);
        assert!(distribution.percentages().is_none());
    }

    proptest! {
        #[test]
        fn test_zone_seconds_sum_to_covered(
            samples in prop::collection::vec((1u32..30, 60u16..200), 2..300)
        ) {
            let zones = ZoneCalculator::heart_rate_zones(&create_test_profile()).unwrap();
            let mut timestamps = Vec::with_capacity(samples.len());
            let mut heart_rate = Vec::with_capacity(samples.len());
            let mut t = 0u32;
            for (dt, hr) in &samples {
                timestamps.push(t);
                heart_rate.push(*hr);
                t += dt;
            }

            let distribution = ZoneAnalyzer::time_in_zones(&timestamps, &heart_rate, &zones);
            let total = timestamps.last().unwrap() - timestamps[0];
            let zone_sum: u32 = distribution.zone_seconds().unwrap().iter().sum();
            prop_assert_eq!(zone_sum, total);
            prop_assert_eq!(distribution.covered_seconds(), Some(total));
        }
    }
}
