//! Per-activity metrics engine
//!
//! Turns one raw [`Activity`] plus the athlete profile into a
//! [`MetricsSnapshot`]: heart rate zone distribution, smoothed pace, filtered
//! elevation gain and an aerobic efficiency index. Every function here is pure;
//! recomputing a snapshot from the same inputs yields the same value.

use chrono::NaiveDateTime;
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DataError;
use crate::models::{Activity, AthleteProfile, HeartRateZones, Sport};
use crate::zones::{ZoneAnalyzer, ZoneCalculator, ZoneError, ZoneTimeDistribution};

/// Metrics engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of speed samples in the trailing moving average
    pub smoothing_window: usize,

    /// Minimum climb in meters before elevation gain is counted
    pub elevation_noise_floor_m: Decimal,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            smoothing_window: 5,
            elevation_noise_floor_m: dec!(3),
        }
    }
}

/// Derived metrics for a single activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub activity_id: String,
    pub start_time: NaiveDateTime,
    pub sport: Sport,
    pub name: Option<String>,
    pub duration_seconds: u32,
    pub distance_meters: Decimal,

    /// Time in heart rate zones, or `Unknown` without HR data
    pub hr_zones: ZoneTimeDistribution,

    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,

    /// Smoothed average pace in minutes per kilometer
    pub avg_pace: Decimal,

    /// Fastest smoothed pace in minutes per kilometer
    pub max_pace: Option<Decimal>,

    /// Noise-filtered elevation gain in meters
    pub elevation_gain: Option<Decimal>,

    /// Meters per minute per heartbeat while in aerobic zones; higher is fitter
    pub efficiency_index: Option<Decimal>,

    pub calories: Option<u16>,
}

impl MetricsSnapshot {
    pub fn distance_km(&self) -> Decimal {
        self.distance_meters / dec!(1000)
    }
}

/// Result of computing a batch of activities
#[derive(Debug, Clone, Default)]
pub struct MetricsBatch {
    /// Snapshots of the valid activities, in input order
    pub snapshots: Vec<MetricsSnapshot>,

    /// Activities skipped because of data errors
    pub skipped: Vec<DataError>,
}

/// One valid sample interval with its speed and starting heart rate
#[derive(Debug, Clone, Copy)]
struct SpeedInterval {
    seconds: u32,
    speed: Decimal,
    heart_rate: Option<u16>,
}

/// Per-activity metrics calculator
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    zones: HeartRateZones,
    config: MetricsConfig,
}

impl MetricsEngine {
    pub fn new(profile: &AthleteProfile, config: MetricsConfig) -> Result<Self, ZoneError> {
        let zones = ZoneCalculator::heart_rate_zones(profile)?;
        Ok(MetricsEngine { zones, config })
    }

    pub fn zones(&self) -> &HeartRateZones {
        &self.zones
    }

    /// Compute metrics for every activity; invalid activities are skipped and reported
    pub fn compute_batch(&self, activities: &[Activity]) -> MetricsBatch {
        let results: Vec<Result<MetricsSnapshot, DataError>> =
            activities.par_iter().map(|a| self.compute(a)).collect();

        let mut batch = MetricsBatch::default();
        for result in results {
            match result {
                Ok(snapshot) => batch.snapshots.push(snapshot),
                Err(err) => {
                    warn!(error = %err, "Skipping activity with invalid data");
                    batch.skipped.push(err);
                }
            }
        }

        debug!(
            computed = batch.snapshots.len(),
            skipped = batch.skipped.len(),
            "Computed activity metrics"
        );
        batch
    }

    /// Compute metrics for one activity
    pub fn compute(&self, activity: &Activity) -> Result<MetricsSnapshot, DataError> {
        activity.validate()?;

        let hr_zones = match &activity.heart_rate {
            Some(hr) => ZoneAnalyzer::time_in_zones(&activity.timestamps, hr, &self.zones),
            None => ZoneTimeDistribution::Unknown,
        };

        let out_of_range = |field| DataError::ValueOutOfRange {
            activity_id: activity.id.clone(),
            field,
        };

        let intervals = Self::speed_intervals(activity);
        let smoothed = Self::smooth(&intervals, self.config.smoothing_window)
            .ok_or_else(|| out_of_range("speed"))?;

        let overall_speed = Self::overall_speed(activity);
        let avg_pace = if intervals.is_empty() {
            elapsed_pace(activity.duration_seconds as u64, activity.distance_meters)
        } else {
            Self::time_weighted_speed(&intervals, &smoothed).and_then(speed_to_pace)
        }
        .ok_or_else(|| out_of_range("pace"))?;
        let max_pace = match smoothed.iter().copied().max() {
            Some(speed) => Some(speed_to_pace(speed).ok_or_else(|| out_of_range("max pace"))?),
            None => None,
        };

        let avg_heart_rate = Self::average_heart_rate(activity);
        let max_heart_rate = activity
            .heart_rate
            .as_ref()
            .and_then(|hr| hr.iter().copied().filter(|&h| h > 0).max())
            .or(activity.max_heart_rate);

        let elevation_gain = match &activity.altitude {
            Some(altitude) => Some(Self::filtered_elevation_gain(
                altitude,
                self.config.elevation_noise_floor_m,
            )),
            None => activity.reported_elevation_gain,
        };

        let efficiency_index = if hr_zones.is_known() {
            self.aerobic_efficiency(&intervals, &smoothed)
                .or_else(|| self.summary_efficiency(avg_heart_rate, overall_speed, &intervals))
        } else {
            self.summary_efficiency(activity.avg_heart_rate, overall_speed, &intervals)
        };

        Ok(MetricsSnapshot {
            activity_id: activity.id.clone(),
            start_time: activity.start_time,
            sport: activity.sport,
            name: activity.name.clone(),
            duration_seconds: activity.duration_seconds,
            distance_meters: activity.distance_meters,
            hr_zones,
            avg_heart_rate,
            max_heart_rate,
            avg_pace,
            max_pace,
            elevation_gain,
            efficiency_index,
            calories: activity.calories,
        })
    }

    /// Collect sample intervals with positive duration and positive speed
    fn speed_intervals(activity: &Activity) -> Vec<SpeedInterval> {
        let speed = match &activity.speed {
            Some(speed) => speed,
            None => return Vec::new(),
        };

        activity
            .timestamps
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| {
                let seconds = pair[1].saturating_sub(pair[0]);
                let sample = speed[i + 1];
                if seconds == 0 || sample <= Decimal::ZERO {
                    return None;
                }
                let heart_rate = activity
                    .heart_rate
                    .as_ref()
                    .map(|hr| hr[i])
                    .filter(|&hr| hr > 0);
                Some(SpeedInterval {
                    seconds,
                    speed: sample,
                    heart_rate,
                })
            })
            .collect()
    }

    /// Trailing moving average over `window` valid samples; `None` if the sum overflows
    fn smooth(intervals: &[SpeedInterval], window: usize) -> Option<Vec<Decimal>> {
        let window = window.max(1);
        let mut smoothed = Vec::with_capacity(intervals.len());
        let mut running_sum = Decimal::ZERO;

        for (i, interval) in intervals.iter().enumerate() {
            running_sum = running_sum.checked_add(interval.speed)?;
            if i >= window {
                running_sum -= intervals[i - window].speed;
            }
            let count = (i + 1).min(window);
            smoothed.push(running_sum / Decimal::from(count));
        }

        Some(smoothed)
    }

    fn time_weighted_speed(intervals: &[SpeedInterval], smoothed: &[Decimal]) -> Option<Decimal> {
        let total_seconds: u64 = intervals.iter().map(|i| i.seconds as u64).sum();
        if total_seconds == 0 {
            return None;
        }
        let weighted = intervals
            .iter()
            .zip(smoothed)
            .try_fold(Decimal::ZERO, |acc, (interval, speed)| {
                acc.checked_add(speed.checked_mul(Decimal::from(interval.seconds))?)
            })?;
        Some(weighted / Decimal::from(total_seconds))
    }

    /// Distance over duration in meters per second
    fn overall_speed(activity: &Activity) -> Decimal {
        activity.distance_meters / Decimal::from(activity.duration_seconds)
    }

    fn average_heart_rate(activity: &Activity) -> Option<u16> {
        let samples: Vec<u32> = activity
            .heart_rate
            .as_ref()
            .map(|hr| hr.iter().filter(|&&h| h > 0).map(|&h| h as u32).collect())
            .unwrap_or_default();

        if samples.is_empty() {
            return activity.avg_heart_rate;
        }
        let sum: u32 = samples.iter().sum();
        Some((sum as f64 / samples.len() as f64).round() as u16)
    }

    /// Efficiency over the aerobic-zone intervals
    fn aerobic_efficiency(&self, intervals: &[SpeedInterval], smoothed: &[Decimal]) -> Option<Decimal> {
        let mut seconds = 0u32;
        let mut speed_seconds = Decimal::ZERO;
        let mut hr_seconds = Decimal::ZERO;

        for (interval, speed) in intervals.iter().zip(smoothed) {
            let hr = match interval.heart_rate {
                Some(hr) if ZoneCalculator::is_aerobic(hr, &self.zones) => hr,
                _ => continue,
            };
            let dt = Decimal::from(interval.seconds);
            seconds += interval.seconds;
            speed_seconds = speed_seconds.checked_add(speed.checked_mul(dt)?)?;
            hr_seconds += Decimal::from(hr) * dt;
        }

        if seconds == 0 || hr_seconds.is_zero() {
            return None;
        }
        let avg_speed = speed_seconds / Decimal::from(seconds);
        let avg_hr = hr_seconds / Decimal::from(seconds);
        efficiency(avg_speed, avg_hr)
    }

    /// Efficiency from summary values when the average HR is aerobic and no
    /// per-sample speed is available
    fn summary_efficiency(
        &self,
        avg_heart_rate: Option<u16>,
        overall_speed: Decimal,
        intervals: &[SpeedInterval],
    ) -> Option<Decimal> {
        if !intervals.is_empty() && intervals.iter().any(|i| i.heart_rate.is_some()) {
            return None;
        }
        let hr = avg_heart_rate.filter(|&hr| hr > 0)?;
        if !ZoneCalculator::is_aerobic(hr, &self.zones) {
            return None;
        }
        efficiency(overall_speed, Decimal::from(hr))
    }

    /// Sum climbs measured from the last local minimum once they reach the noise floor
    pub fn filtered_elevation_gain(altitude: &[Decimal], noise_floor: Decimal) -> Decimal {
        let mut samples = altitude.iter().copied();
        let mut reference = match samples.next() {
            Some(first) => first,
            None => return Decimal::ZERO,
        };
        let mut gain = Decimal::ZERO;

        for value in samples {
            let climb = value.saturating_sub(reference);
            if value < reference {
                reference = value;
            } else if climb >= noise_floor {
                gain = gain.saturating_add(climb);
                reference = value;
            }
        }

        gain
    }
}

/// Convert meters per second into minutes per kilometer; `None` for
/// non-positive speeds or a pace too large to represent
pub fn speed_to_pace(speed: Decimal) -> Option<Decimal> {
    if speed <= Decimal::ZERO {
        return None;
    }
    dec!(1000).checked_div(speed.checked_mul(dec!(60))?)
}

/// Elapsed minutes per kilometer over a whole activity or window
pub fn elapsed_pace(seconds: u64, meters: Decimal) -> Option<Decimal> {
    if meters <= Decimal::ZERO {
        return None;
    }
    Decimal::from(seconds)
        .checked_mul(dec!(1000))?
        .checked_div(meters.checked_mul(dec!(60))?)
}

fn efficiency(speed_mps: Decimal, heart_rate: Decimal) -> Option<Decimal> {
    Some(speed_mps.checked_mul(dec!(60))?.checked_div(heart_rate)?.round_dp(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    fn engine() -> MetricsEngine {
        let profile = AthleteProfile::new(190).with_resting_hr(50);
        MetricsEngine::new(&profile, MetricsConfig::default()).unwrap()
    }

    /// 30 minute run sampled every 5 seconds at a steady ~3.33 m/s with a noisy GPS
    fn create_sample_run(heart_rate: u16) -> Activity {
        let samples = 361;
        let timestamps: Vec<u32> = (0..samples).map(|i| i * 5).collect();
        let speed: Vec<Decimal> = (0..samples)
            .map(|i| if i % 2 == 0 { dec!(3.53) } else { dec!(3.13) })
            .collect();
        let altitude: Vec<Decimal> = (0..samples)
            .map(|i| dec!(100) + if i % 2 == 0 { dec!(0) } else { dec!(1) })
            .collect();

        Activity::summary("run_1", start(), 1800, dec!(6000))
            .with_timestamps(timestamps)
            .with_heart_rate(vec![heart_rate; samples as usize])
            .with_speed(speed)
            .with_altitude(altitude)
    }

    #[test]
    fn test_steady_run_metrics() {
        let snapshot = engine().compute(&create_sample_run(140)).unwrap();

        // 3.33 m/s is 5:00 min/km
        assert!((snapshot.avg_pace - dec!(5.0)).abs() < dec!(0.05));
        assert!(snapshot.max_pace.unwrap() <= snapshot.avg_pace);
        assert_eq!(snapshot.avg_heart_rate, Some(140));
        assert_eq!(snapshot.hr_zones.zone_seconds(), Some([0, 1800, 0, 0, 0]));
    }

    #[test]
    fn test_smoothing_suppresses_gps_noise() {
        let snapshot = engine().compute(&create_sample_run(140)).unwrap();
        // Raw peaks reach 3.53 m/s (4:43/km); smoothed max stays close to the mean
        let raw_peak_pace = speed_to_pace(dec!(3.53)).unwrap();
        assert!(snapshot.max_pace.unwrap() > raw_peak_pace);
    }

    #[test]
    fn test_zero_intervals_excluded_from_pace() {
        let activity = Activity::summary("stops", start(), 40, dec!(100))
            .with_timestamps(vec![0, 10, 10, 20, 30])
            .with_speed(vec![dec!(0), dec!(4), dec!(9), dec!(0), dec!(4)]);
        let snapshot = engine().compute(&activity).unwrap();

        // Only the two 4 m/s intervals count
        assert_eq!(Some(snapshot.avg_pace), speed_to_pace(dec!(4)));
    }

    #[test]
    fn test_elevation_noise_floor() {
        let jitter = vec![dec!(100), dec!(101), dec!(100), dec!(102), dec!(100), dec!(101)];
        assert_eq!(MetricsEngine::filtered_elevation_gain(&jitter, dec!(3)), dec!(0));

        let climb = vec![dec!(100), dec!(101), dec!(102), dec!(103), dec!(104), dec!(98), dec!(105)];
        assert_eq!(MetricsEngine::filtered_elevation_gain(&climb, dec!(3)), dec!(10));

        assert_eq!(MetricsEngine::filtered_elevation_gain(&[], dec!(3)), dec!(0));
    }

    #[test]
    fn test_jittery_altitude_has_no_gain() {
        let snapshot = engine().compute(&create_sample_run(140)).unwrap();
        assert_eq!(snapshot.elevation_gain, Some(dec!(0)));
    }

    #[test]
    fn test_efficiency_index_defined_in_aerobic_zone() {
        let snapshot = engine().compute(&create_sample_run(140)).unwrap();
        let ei = snapshot.efficiency_index.unwrap();
        // ~200 m/min at 140 bpm
        assert!(ei > dec!(1.35) && ei < dec!(1.5));
    }

    #[test]
    fn test_efficiency_undefined_without_heart_rate() {
        let mut activity = create_sample_run(140);
        activity.heart_rate = None;
        let snapshot = engine().compute(&activity).unwrap();

        assert_eq!(snapshot.hr_zones, ZoneTimeDistribution::Unknown);
        assert_eq!(snapshot.efficiency_index, None);
        assert_eq!(snapshot.avg_heart_rate, None);
    }

    #[test]
    fn test_efficiency_undefined_outside_aerobic_zone() {
        let snapshot = engine().compute(&create_sample_run(180)).unwrap();
        assert_eq!(snapshot.efficiency_index, None);
    }

    #[test]
    fn test_summary_only_activity() {
        let activity = Activity::summary("summary", start(), 1500, dec!(5000))
            .with_avg_heart_rate(145);
        let snapshot = engine().compute(&activity).unwrap();

        assert_eq!(snapshot.avg_pace, dec!(5));
        assert_eq!(snapshot.max_pace, None);
        assert_eq!(snapshot.hr_zones, ZoneTimeDistribution::Unknown);
        assert_eq!(snapshot.avg_heart_rate, Some(145));
        assert!(snapshot.efficiency_index.is_some());
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let engine = engine();
        let activity = create_sample_run(150);
        assert_eq!(engine.compute(&activity).unwrap(), engine.compute(&activity).unwrap());
    }

    #[test]
    fn test_batch_skips_invalid_activity() {
        let good = create_sample_run(140);
        let bad = Activity::summary("broken", start(), 0, dec!(5000));
        let mut also_good = create_sample_run(150);
        also_good.id = "run_2".to_string();

        let batch = engine().compute_batch(&[good, bad, also_good]);

        assert_eq!(batch.snapshots.len(), 2);
        assert_eq!(batch.snapshots[0].activity_id, "run_1");
        assert_eq!(batch.snapshots[1].activity_id, "run_2");
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].activity_id(), Some("broken"));
    }

    #[test]
    fn test_batch_skips_activity_with_unrepresentable_pace() {
        let good = create_sample_run(140);
        let tiny = Activity::summary("tiny", start(), 1800, Decimal::new(1, 28));

        let batch = engine().compute_batch(&[good, tiny]);

        assert_eq!(batch.snapshots.len(), 1);
        assert_eq!(batch.snapshots[0].activity_id, "run_1");
        assert_eq!(
            batch.skipped,
            vec![DataError::ValueOutOfRange {
                activity_id: "tiny".to_string(),
                field: "pace",
            }]
        );
    }

    #[test]
    fn test_extreme_samples_do_not_panic() {
        let crawl = Activity::summary("crawl", start(), 10, dec!(100))
            .with_timestamps(vec![0, 5, 10])
            .with_speed(vec![Decimal::new(1, 28); 3]);
        assert!(matches!(
            engine().compute(&crawl),
            Err(DataError::ValueOutOfRange { field: "pace", .. })
        ));

        let warp = Activity::summary("warp", start(), 10, dec!(100))
            .with_timestamps(vec![0, 5, 10])
            .with_speed(vec![Decimal::MAX; 3]);
        assert!(matches!(
            engine().compute(&warp),
            Err(DataError::ValueOutOfRange { field: "speed", .. })
        ));

        let cliff = vec![Decimal::MIN, Decimal::MAX, Decimal::MIN, Decimal::MAX];
        assert_eq!(MetricsEngine::filtered_elevation_gain(&cliff, dec!(3)), Decimal::MAX);
    }
}
