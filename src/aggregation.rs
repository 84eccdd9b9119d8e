//! Calendar-period aggregation of activity metrics
//!
//! Snapshots are bucketed into calendar-aligned weeks or months. Each populated
//! period becomes one [`TrainingWindow`] carrying totals, training load and an
//! acute:chronic load trend against the preceding periods.

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::load::{LoadConfig, LoadModel};
use crate::metrics::{elapsed_pace, MetricsSnapshot};
use crate::models::HeartRateZones;

/// Bucketing granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Week,
    Month,
}

/// Load trend relative to the preceding periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadTrend {
    /// Acute load well above the chronic baseline
    Elevated,
    Stable,
    /// Acute load well below the chronic baseline
    Reduced,
    /// No load in any preceding period
    NoBaseline,
}

impl LoadTrend {
    pub fn description(&self) -> &'static str {
        match self {
            LoadTrend::Elevated => "elevated (injury risk, consider easing off)",
            LoadTrend::Stable => "stable",
            LoadTrend::Reduced => "reduced (detraining or recovery)",
            LoadTrend::NoBaseline => "no baseline yet",
        }
    }
}

/// Aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// First day of a calendar week (default: Monday)
    pub week_start: Weekday,

    /// Number of preceding periods forming the chronic load
    pub lookback_windows: usize,

    /// Acute:chronic ratio above which load is flagged elevated;
    /// its complement (2 - threshold) flags reduced load
    pub acwr_threshold: Decimal,

    /// Training load scoring
    pub load: LoadConfig,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            week_start: Weekday::Mon,
            lookback_windows: 4,
            acwr_threshold: dec!(1.3),
            load: LoadConfig::default(),
        }
    }
}

/// Aggregated metrics for one calendar period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingWindow {
    /// First day of the period
    pub period_start: NaiveDate,

    /// Last day of the period (inclusive)
    pub period_end: NaiveDate,

    pub granularity: Granularity,

    /// Number of activities in the period
    pub activity_count: u32,

    pub total_distance_meters: Decimal,
    pub total_duration_seconds: u64,
    pub total_elevation_gain: Decimal,

    /// Total time over total distance in minutes per kilometer
    pub avg_pace: Option<Decimal>,

    /// Mean of the per-activity average heart rates
    pub avg_heart_rate: Option<u16>,

    /// Sum of per-activity training loads
    pub training_load: Decimal,

    /// Acute:chronic workload ratio, absent without a baseline
    pub acute_chronic_ratio: Option<Decimal>,

    pub trend: LoadTrend,

    /// Activities in the period, ordered by start time then id
    pub activity_ids: Vec<String>,
}

impl TrainingWindow {
    fn empty(period_start: NaiveDate, period_end: NaiveDate, granularity: Granularity) -> Self {
        TrainingWindow {
            period_start,
            period_end,
            granularity,
            activity_count: 0,
            total_distance_meters: Decimal::ZERO,
            total_duration_seconds: 0,
            total_elevation_gain: Decimal::ZERO,
            avg_pace: None,
            avg_heart_rate: None,
            training_load: Decimal::ZERO,
            acute_chronic_ratio: None,
            trend: LoadTrend::NoBaseline,
            activity_ids: Vec::new(),
        }
    }

    pub fn total_distance_km(&self) -> Decimal {
        self.total_distance_meters / dec!(1000)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.period_start && date <= self.period_end
    }
}

/// Groups snapshots into calendar windows and scores their load
#[derive(Debug, Clone)]
pub struct Aggregator {
    config: AggregationConfig,
    load_model: LoadModel,
}

impl Aggregator {
    pub fn new(config: AggregationConfig, zones: HeartRateZones) -> Self {
        let load_model = LoadModel::new(config.load.clone(), zones);
        Aggregator { config, load_model }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Build one window per populated period, oldest first.
    ///
    /// Input order does not matter; the result is identical for any permutation
    /// of the same snapshots.
    pub fn aggregate(
        &self,
        snapshots: &[MetricsSnapshot],
        granularity: Granularity,
    ) -> Vec<TrainingWindow> {
        let mut ordered: Vec<&MetricsSnapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.activity_id.cmp(&b.activity_id))
        });

        let mut buckets: BTreeMap<NaiveDate, Vec<&MetricsSnapshot>> = BTreeMap::new();
        for snapshot in ordered {
            let key = self.period_start(snapshot.start_time.date(), granularity);
            buckets.entry(key).or_default().push(snapshot);
        }

        let mut windows: Vec<TrainingWindow> = buckets
            .iter()
            .map(|(start, members)| self.build_window(*start, granularity, members))
            .collect();

        let loads: BTreeMap<NaiveDate, Decimal> = windows
            .iter()
            .map(|w| (w.period_start, w.training_load))
            .collect();
        for window in &mut windows {
            let (ratio, trend) = self.classify(window.period_start, granularity, &loads);
            window.acute_chronic_ratio = ratio;
            window.trend = trend;
        }

        debug!(
            windows = windows.len(),
            granularity = ?granularity,
            "Aggregated training windows"
        );
        windows
    }

    /// The last `count` calendar weeks ending with the week containing `as_of`,
    /// oldest first, with empty weeks filled in.
    pub fn recent_weeks(
        &self,
        windows: &[TrainingWindow],
        as_of: NaiveDate,
        count: usize,
    ) -> Vec<TrainingWindow> {
        let by_start: BTreeMap<NaiveDate, &TrainingWindow> = windows
            .iter()
            .filter(|w| w.granularity == Granularity::Week)
            .map(|w| (w.period_start, w))
            .collect();
        let loads: BTreeMap<NaiveDate, Decimal> = by_start
            .iter()
            .map(|(start, w)| (*start, w.training_load))
            .collect();

        let mut starts = Vec::with_capacity(count);
        let mut current = Some(self.period_start(as_of, Granularity::Week));
        while starts.len() < count {
            match current {
                Some(start) => {
                    starts.push(start);
                    current = previous_period(start, Granularity::Week);
                }
                None => break,
            }
        }
        starts.reverse();

        starts
            .into_iter()
            .map(|start| match by_start.get(&start) {
                Some(window) => (*window).clone(),
                None => {
                    let end = period_end(start, Granularity::Week);
                    let mut window = TrainingWindow::empty(start, end, Granularity::Week);
                    let (ratio, trend) = self.classify(start, Granularity::Week, &loads);
                    window.acute_chronic_ratio = ratio;
                    window.trend = trend;
                    window
                }
            })
            .collect()
    }

    /// First day of the period containing `date`
    pub fn period_start(&self, date: NaiveDate, granularity: Granularity) -> NaiveDate {
        match granularity {
            Granularity::Week => {
                let offset = (date.weekday().num_days_from_monday() + 7
                    - self.config.week_start.num_days_from_monday())
                    % 7;
                date - Days::new(offset as u64)
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }

    fn build_window(
        &self,
        period_start: NaiveDate,
        granularity: Granularity,
        members: &[&MetricsSnapshot],
    ) -> TrainingWindow {
        let mut window =
            TrainingWindow::empty(period_start, period_end(period_start, granularity), granularity);
        let mut heart_rates = Vec::new();

        for snapshot in members {
            window.activity_count += 1;
            window.total_distance_meters =
                window.total_distance_meters.saturating_add(snapshot.distance_meters);
            window.total_duration_seconds += snapshot.duration_seconds as u64;
            window.total_elevation_gain = window
                .total_elevation_gain
                .saturating_add(snapshot.elevation_gain.unwrap_or(Decimal::ZERO));
            window.training_load += self.load_model.score(snapshot).load;
            window.activity_ids.push(snapshot.activity_id.clone());
            if let Some(hr) = snapshot.avg_heart_rate {
                heart_rates.push(hr as u32);
            }
        }

        window.avg_pace = elapsed_pace(window.total_duration_seconds, window.total_distance_meters);
        if !heart_rates.is_empty() {
            let sum: u32 = heart_rates.iter().sum();
            window.avg_heart_rate = Some((sum as f64 / heart_rates.len() as f64).round() as u16);
        }

        window
    }

    /// Compare a period's load against the mean of the preceding periods
    fn classify(
        &self,
        period_start: NaiveDate,
        granularity: Granularity,
        loads: &BTreeMap<NaiveDate, Decimal>,
    ) -> (Option<Decimal>, LoadTrend) {
        let lookback = self.config.lookback_windows.max(1);
        let acute = loads.get(&period_start).copied().unwrap_or(Decimal::ZERO);

        let mut prior_total = Decimal::ZERO;
        let mut cursor = period_start;
        for _ in 0..lookback {
            cursor = match previous_period(cursor, granularity) {
                Some(previous) => previous,
                None => break,
            };
            prior_total += loads.get(&cursor).copied().unwrap_or(Decimal::ZERO);
        }

        if prior_total <= Decimal::ZERO {
            return (None, LoadTrend::NoBaseline);
        }

        let chronic = prior_total / Decimal::from(lookback);
        let ratio = match acute.checked_div(chronic) {
            Some(ratio) => ratio,
            None => return (None, LoadTrend::Elevated),
        };
        let threshold = self.config.acwr_threshold;
        let trend = if ratio > threshold {
            LoadTrend::Elevated
        } else if ratio < dec!(2) - threshold {
            LoadTrend::Reduced
        } else {
            LoadTrend::Stable
        };

        (Some(ratio.round_dp(3)), trend)
    }
}

fn previous_period(start: NaiveDate, granularity: Granularity) -> Option<NaiveDate> {
    match granularity {
        Granularity::Week => start.checked_sub_days(Days::new(7)),
        Granularity::Month => start.checked_sub_months(Months::new(1)),
    }
}

fn period_end(start: NaiveDate, granularity: Granularity) -> NaiveDate {
    let next = match granularity {
        Granularity::Week => start.checked_add_days(Days::new(7)),
        Granularity::Month => start.checked_add_months(Months::new(1)),
    };
    next.and_then(|n| n.pred_opt()).unwrap_or(start)
}
