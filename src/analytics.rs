//! Session analytics pipeline
//!
//! Runs the metrics engine, aggregator and race predictor over one activity set
//! and keeps the results together. The bundle is immutable; a changed activity
//! set is handled by running the pipeline again.

use chrono::NaiveDate;
use tracing::info;

use crate::aggregation::{AggregationConfig, Aggregator, Granularity, TrainingWindow};
use crate::error::{CalculationError, DataError, RunCoachError};
use crate::metrics::{MetricsConfig, MetricsEngine, MetricsSnapshot};
use crate::models::{Activity, AthleteProfile};
use crate::prediction::{PredictionConfig, RaceDistance, RacePrediction, RacePredictor};

/// Everything derived from one activity set
#[derive(Debug, Clone)]
pub struct TrainingAnalytics {
    pub profile: AthleteProfile,

    /// Reference date for predictions and recent windows
    pub as_of: NaiveDate,

    /// One snapshot per valid activity, ordered by start time then id
    pub snapshots: Vec<MetricsSnapshot>,

    pub weekly: Vec<TrainingWindow>,
    pub monthly: Vec<TrainingWindow>,

    /// Prediction or failure per configured target
    pub predictions: Vec<(RaceDistance, Result<RacePrediction, CalculationError>)>,

    /// Activities that failed validation
    pub skipped: Vec<DataError>,

    aggregator: Aggregator,
    predictor: RacePredictor,
}

impl TrainingAnalytics {
    pub fn snapshot(&self, activity_id: &str) -> Option<&MetricsSnapshot> {
        self.snapshots.iter().find(|s| s.activity_id == activity_id)
    }

    /// Most recent snapshots first
    pub fn recent_snapshots(&self) -> impl Iterator<Item = &MetricsSnapshot> {
        self.snapshots.iter().rev()
    }

    pub fn prediction(&self, target: RaceDistance) -> Option<&Result<RacePrediction, CalculationError>> {
        self.predictions
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, result)| result)
    }

    /// Stored prediction for the target, or a fresh one for targets not precomputed
    pub fn predict(&self, target: RaceDistance) -> Result<RacePrediction, CalculationError> {
        match self.prediction(target) {
            Some(result) => result.clone(),
            None => self.predictor.predict(&self.snapshots, self.as_of, target),
        }
    }

    /// The last `count` calendar weeks up to `as_of`, empty weeks included
    pub fn recent_weeks(&self, as_of: NaiveDate, count: usize) -> Vec<TrainingWindow> {
        self.aggregator.recent_weeks(&self.weekly, as_of, count)
    }
}

/// Configured metrics engine, aggregator and predictor for one athlete
#[derive(Debug, Clone)]
pub struct AnalyticsPipeline {
    profile: AthleteProfile,
    engine: MetricsEngine,
    aggregator: Aggregator,
    predictor: RacePredictor,
}

impl AnalyticsPipeline {
    pub fn new(
        profile: AthleteProfile,
        metrics: MetricsConfig,
        aggregation: AggregationConfig,
        prediction: PredictionConfig,
    ) -> Result<Self, RunCoachError> {
        profile.validate()?;
        let engine = MetricsEngine::new(&profile, metrics)
            .map_err(|e| RunCoachError::Configuration(e.to_string()))?;
        let aggregator = Aggregator::new(aggregation, engine.zones().clone());

        Ok(AnalyticsPipeline {
            profile,
            engine,
            aggregator,
            predictor: RacePredictor::with_config(prediction),
        })
    }

    pub fn engine(&self) -> &MetricsEngine {
        &self.engine
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn predictor(&self) -> &RacePredictor {
        &self.predictor
    }

    /// Compute every derived value for the activity set
    pub fn run(&self, activities: &[Activity], as_of: NaiveDate) -> TrainingAnalytics {
        let batch = self.engine.compute_batch(activities);
        let mut snapshots = batch.snapshots;
        snapshots.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.activity_id.cmp(&b.activity_id))
        });

        let weekly = self.aggregator.aggregate(&snapshots, Granularity::Week);
        let monthly = self.aggregator.aggregate(&snapshots, Granularity::Month);
        let predictions =
            self.predictor
                .predict_all(&snapshots, as_of, &self.predictor.config().targets);

        info!(
            activities = activities.len(),
            snapshots = snapshots.len(),
            skipped = batch.skipped.len(),
            weeks = weekly.len(),
            "Computed training analytics"
        );

        TrainingAnalytics {
            profile: self.profile.clone(),
            as_of,
            snapshots,
            weekly,
            monthly,
            predictions,
            skipped: batch.skipped,
            aggregator: self.aggregator.clone(),
            predictor: self.predictor.clone(),
        }
    }
}
