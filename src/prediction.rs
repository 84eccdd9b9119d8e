use chrono::{Days, NaiveDate};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::error::CalculationError;
use crate::metrics::MetricsSnapshot;

/// Race target distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceDistance {
    FiveK,
    TenK,
    HalfMarathon,
    Marathon,
    /// Custom distance in meters
    Custom(Decimal),
}

impl RaceDistance {
    /// Distances efforts are grouped by during baseline selection
    pub const STANDARD: [RaceDistance; 4] = [
        RaceDistance::FiveK,
        RaceDistance::TenK,
        RaceDistance::HalfMarathon,
        RaceDistance::Marathon,
    ];

    pub fn meters(&self) -> Decimal {
        match self {
            RaceDistance::FiveK => dec!(5000),
            RaceDistance::TenK => dec!(10000),
            RaceDistance::HalfMarathon => dec!(21097.5),
            RaceDistance::Marathon => dec!(42195),
            RaceDistance::Custom(meters) => *meters,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RaceDistance::FiveK => "5K".to_string(),
            RaceDistance::TenK => "10K".to_string(),
            RaceDistance::HalfMarathon => "Half Marathon".to_string(),
            RaceDistance::Marathon => "Marathon".to_string(),
            RaceDistance::Custom(meters) => format!("{} km", (*meters / dec!(1000)).normalize()),
        }
    }
}

/// Qualitative confidence of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Moderate,
    High,
}

impl Confidence {
    pub fn from_score(score: Decimal) -> Self {
        if score >= dec!(0.7) {
            Confidence::High
        } else if score >= dec!(0.4) {
            Confidence::Moderate
        } else {
            Confidence::Low
        }
    }
}

/// Race predictor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Only efforts this many days before the reference date qualify
    pub lookback_days: u32,

    /// Shortest effort that can serve as a baseline, in meters
    pub min_effort_m: Decimal,

    /// Largest distance ratio between baseline and target in either direction
    pub max_extrapolation_ratio: Decimal,

    /// Riegel fatigue exponent
    pub riegel_exponent: Decimal,

    /// Distances predicted by the analytics pipeline
    pub targets: Vec<RaceDistance>,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            lookback_days: 90,
            min_effort_m: dec!(1500),
            max_extrapolation_ratio: dec!(2.5),
            riegel_exponent: dec!(1.06),
            targets: RaceDistance::STANDARD.to_vec(),
        }
    }
}

/// The effort a prediction is scaled from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEffort {
    pub activity_id: String,
    pub date: NaiveDate,
    pub distance_meters: Decimal,
    pub duration_seconds: u32,
}

/// Predicted race result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacePrediction {
    pub target: RaceDistance,

    /// Predicted finish time in seconds
    pub predicted_seconds: u32,

    /// Predicted pace in minutes per kilometer
    pub predicted_pace: Decimal,

    pub confidence: Confidence,

    /// Confidence score in [0, 1]
    pub confidence_score: Decimal,

    pub baseline: BaselineEffort,

    /// Number of qualifying efforts for this target
    pub qualifying_efforts: u32,

    /// Activities backing the prediction, baseline first
    pub evidence_ids: Vec<String>,
}

/// Riegel-based race time predictor
#[derive(Debug, Clone, Default)]
pub struct RacePredictor {
    config: PredictionConfig,
}

impl RacePredictor {
    pub fn new() -> Self {
        RacePredictor {
            config: PredictionConfig::default(),
        }
    }

    pub fn with_config(config: PredictionConfig) -> Self {
        RacePredictor { config }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Predict every target, keeping failures next to their target
    pub fn predict_all(
        &self,
        snapshots: &[MetricsSnapshot],
        as_of: NaiveDate,
        targets: &[RaceDistance],
    ) -> Vec<(RaceDistance, Result<RacePrediction, CalculationError>)> {
        targets
            .iter()
            .map(|target| (*target, self.predict(snapshots, as_of, *target)))
            .collect()
    }

    /// Predict the finish time for one target distance
    pub fn predict(
        &self,
        snapshots: &[MetricsSnapshot],
        as_of: NaiveDate,
        target: RaceDistance,
    ) -> Result<RacePrediction, CalculationError> {
        let target_meters = target.meters();
        if target_meters <= Decimal::ZERO {
            return Err(self.invalid("target_distance", target_meters));
        }
        if self.config.lookback_days == 0 {
            return Err(self.invalid("lookback_days", self.config.lookback_days));
        }
        let exponent = self
            .config
            .riegel_exponent
            .to_f64()
            .ok_or_else(|| self.invalid("riegel_exponent", self.config.riegel_exponent))?;

        let qualifying = self.qualifying_efforts(snapshots, as_of, target_meters);
        if qualifying.is_empty() {
            debug!(target = %target.label(), "No qualifying efforts for prediction");
            return Err(CalculationError::InsufficientData {
                calculation: format!("{} prediction", target.label()),
                reason: format!(
                    "insufficient history: no qualifying efforts in the last {} days",
                    self.config.lookback_days
                ),
            });
        }

        let group = closest_group(&qualifying, target_meters);
        let baseline = qualifying
            .iter()
            .filter(|s| nearest_standard(s.distance_meters) == group)
            .min_by(|a, b| compare_efforts(a, b, group.meters(), exponent))
            .copied()
            .ok_or_else(|| CalculationError::InsufficientData {
                calculation: format!("{} prediction", target.label()),
                reason: "insufficient history".to_string(),
            })?;

        let predicted = riegel(
            baseline.duration_seconds as f64,
            ratio(target_meters, baseline.distance_meters),
            exponent,
        );
        let predicted_seconds = predicted.round() as u32;
        let predicted_pace = Decimal::from(predicted_seconds) * dec!(1000)
            / (target_meters * dec!(60));

        let days_since = (as_of - baseline.start_time.date()).num_days().max(0) as u32;
        let confidence_score = self.confidence_score(qualifying.len(), days_since);

        let mut evidence_ids = vec![baseline.activity_id.clone()];
        evidence_ids.extend(
            qualifying
                .iter()
                .filter(|s| s.activity_id != baseline.activity_id)
                .map(|s| s.activity_id.clone()),
        );

        debug!(
            target = %target.label(),
            baseline = %baseline.activity_id,
            predicted_seconds,
            "Predicted race time"
        );

        Ok(RacePrediction {
            target,
            predicted_seconds,
            predicted_pace,
            confidence: Confidence::from_score(confidence_score),
            confidence_score,
            baseline: BaselineEffort {
                activity_id: baseline.activity_id.clone(),
                date: baseline.start_time.date(),
                distance_meters: baseline.distance_meters,
                duration_seconds: baseline.duration_seconds,
            },
            qualifying_efforts: qualifying.len() as u32,
            evidence_ids,
        })
    }

    /// Running efforts inside the lookback window within extrapolation range
    fn qualifying_efforts<'a>(
        &self,
        snapshots: &'a [MetricsSnapshot],
        as_of: NaiveDate,
        target_meters: Decimal,
    ) -> Vec<&'a MetricsSnapshot> {
        let earliest = as_of
            .checked_sub_days(Days::new(self.config.lookback_days as u64))
            .unwrap_or(NaiveDate::MIN);

        let mut efforts: Vec<&MetricsSnapshot> = snapshots
            .iter()
            .filter(|s| s.sport.is_running())
            .filter(|s| {
                let date = s.start_time.date();
                date >= earliest && date <= as_of
            })
            .filter(|s| s.distance_meters >= self.config.min_effort_m && s.duration_seconds > 0)
            .filter(|s| {
                let (long, short) = if s.distance_meters > target_meters {
                    (s.distance_meters, target_meters)
                } else {
                    (target_meters, s.distance_meters)
                };
                long / short <= self.config.max_extrapolation_ratio
            })
            .collect();

        efforts.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.activity_id.cmp(&b.activity_id))
        });
        efforts
    }

    /// 0.5 × effort count share + 0.5 × recency of the baseline
    fn confidence_score(&self, efforts: usize, days_since: u32) -> Decimal {
        let lookback = self.config.lookback_days;
        let count_share = Decimal::from(efforts.min(5)) / dec!(5);
        let recency = Decimal::from(lookback.saturating_sub(days_since)) / Decimal::from(lookback);
        (dec!(0.5) * count_share + dec!(0.5) * recency).round_dp(3)
    }

    fn invalid(&self, parameter: &str, value: impl ToString) -> CalculationError {
        CalculationError::InvalidParameter {
            calculation: "race prediction".to_string(),
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
    }
}

fn ratio(a: Decimal, b: Decimal) -> f64 {
    (a / b).to_f64().unwrap_or(1.0)
}

/// Riegel: t2 = t1 × (d2 / d1)^exponent
fn riegel(seconds: f64, distance_ratio: f64, exponent: f64) -> f64 {
    seconds * distance_ratio.powf(exponent)
}

fn log_distance(a: Decimal, b: Decimal) -> f64 {
    ratio(a, b).ln().abs()
}

fn nearest_standard(distance: Decimal) -> RaceDistance {
    let mut best = RaceDistance::FiveK;
    let mut best_gap = f64::MAX;
    for standard in RaceDistance::STANDARD {
        let gap = log_distance(distance, standard.meters());
        if gap < best_gap {
            best = standard;
            best_gap = gap;
        }
    }
    best
}

/// Standard-distance group among the efforts that lies closest to the target
fn closest_group(efforts: &[&MetricsSnapshot], target_meters: Decimal) -> RaceDistance {
    let mut best = nearest_standard(efforts[0].distance_meters);
    let mut best_gap = f64::MAX;
    for effort in efforts {
        let group = nearest_standard(effort.distance_meters);
        let gap = log_distance(group.meters(), target_meters);
        if gap < best_gap {
            best = group;
            best_gap = gap;
        }
    }
    best
}

/// Fastest time normalised to the group distance first, then most recent, then id
fn compare_efforts(
    a: &MetricsSnapshot,
    b: &MetricsSnapshot,
    group_meters: Decimal,
    exponent: f64,
) -> Ordering {
    let normalized = |s: &MetricsSnapshot| {
        riegel(
            s.duration_seconds as f64,
            ratio(group_meters, s.distance_meters),
            exponent,
        )
    };
    normalized(a)
        .partial_cmp(&normalized(b))
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.start_time.cmp(&a.start_time))
        .then_with(|| a.activity_id.cmp(&b.activity_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsConfig, MetricsEngine};
    use crate::models::{Activity, AthleteProfile, Sport};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn effort(id: &str, days_ago: u64, meters: Decimal, seconds: u32) -> Activity {
        let start = (as_of() - Days::new(days_ago)).and_hms_opt(7, 0, 0).unwrap();
        Activity::summary(id, start, seconds, meters)
    }

    fn snapshots(activities: &[Activity]) -> Vec<MetricsSnapshot> {
        let profile = AthleteProfile::new(190);
        MetricsEngine::new(&profile, MetricsConfig::default())
            .unwrap()
            .compute_batch(activities)
            .snapshots
    }

    #[test]
    fn test_riegel_5k_to_10k() {
        let snaps = snapshots(&[effort("5k", 3, dec!(5000), 1500)]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::TenK)
            .unwrap();

        // 25:00 × 2^1.06 ≈ 52:07
        let expected = 52 * 60 + 7;
        assert!((prediction.predicted_seconds as i64 - expected).abs() <= 5);
        assert_eq!(prediction.baseline.activity_id, "5k");
    }

    #[test]
    fn test_best_effort_selected() {
        let snaps = snapshots(&[
            effort("a", 10, dec!(5000), 1320),
            effort("b", 5, dec!(5000), 1440),
            effort("c", 2, dec!(5000), 1410),
        ]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::FiveK)
            .unwrap();

        assert_eq!(prediction.predicted_seconds, 1320);
        assert_eq!(prediction.baseline.activity_id, "a");
        assert_eq!(prediction.qualifying_efforts, 3);
        assert_eq!(prediction.evidence_ids[0], "a");
        assert_eq!(prediction.evidence_ids.len(), 3);
    }

    #[test]
    fn test_tie_prefers_most_recent() {
        let snaps = snapshots(&[
            effort("older", 20, dec!(5000), 1320),
            effort("newer", 4, dec!(5000), 1320),
        ]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::FiveK)
            .unwrap();
        assert_eq!(prediction.baseline.activity_id, "newer");
    }

    #[test]
    fn test_closest_distance_group_wins() {
        // A fast 5K and a 10K; the 10K group is closer to a half marathon
        let snaps = snapshots(&[
            effort("fast5k", 5, dec!(5000), 1200),
            effort("tenk", 8, dec!(10000), 2700),
        ]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::HalfMarathon)
            .unwrap();
        assert_eq!(prediction.baseline.activity_id, "tenk");
        assert_eq!(prediction.qualifying_efforts, 1);
    }

    #[test]
    fn test_insufficient_history() {
        let snaps = snapshots(&[effort("5k", 3, dec!(5000), 1500)]);
        let predictor = RacePredictor::new();

        for target in [RaceDistance::HalfMarathon, RaceDistance::Marathon] {
            let err = predictor.predict(&snaps, as_of(), target).unwrap_err();
            match err {
                CalculationError::InsufficientData { reason, .. } => {
                    assert!(reason.contains("insufficient history"))
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
    }

    #[test]
    fn test_lookback_and_sport_filters() {
        let snaps = snapshots(&[
            effort("stale", 120, dec!(5000), 1200),
            effort("walk", 3, dec!(5000), 3000).with_sport(Sport::Walking),
            effort("short", 2, dec!(1000), 200),
            effort("future", 0, dec!(5000), 1500),
        ]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::FiveK)
            .unwrap();

        assert_eq!(prediction.baseline.activity_id, "future");
        assert_eq!(prediction.qualifying_efforts, 1);
    }

    #[test]
    fn test_confidence_monotonic() {
        let predictor = RacePredictor::new();
        let one_recent = predictor.confidence_score(1, 0);
        let five_recent = predictor.confidence_score(5, 0);
        let five_stale = predictor.confidence_score(5, 80);

        assert!(five_recent > one_recent);
        assert!(five_recent > five_stale);
        assert_eq!(five_recent, dec!(1));
        assert_eq!(Confidence::from_score(five_recent), Confidence::High);
        assert_eq!(Confidence::from_score(dec!(0.45)), Confidence::Moderate);
        assert_eq!(Confidence::from_score(dec!(0.1)), Confidence::Low);
    }

    #[test]
    fn test_custom_distance() {
        let snaps = snapshots(&[effort("5k", 1, dec!(5000), 1500)]);
        let prediction = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::Custom(dec!(8000)))
            .unwrap();
        assert!(prediction.predicted_seconds > 1500 * 8 / 5);
        assert_eq!(RaceDistance::Custom(dec!(8000)).label(), "8 km");

        let err = RacePredictor::new()
            .predict(&snaps, as_of(), RaceDistance::Custom(dec!(0)))
            .unwrap_err();
        assert!(matches!(err, CalculationError::InvalidParameter { .. }));
    }
}
