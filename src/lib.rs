//! Running-training analytics and AI coaching orchestration.
//!
//! Activities flow through [`analytics::AnalyticsPipeline`] into per-activity
//! metrics, calendar windows and race predictions. A [`coach::Coach`] turns
//! those into bounded prompts for a local (Ollama) or cloud (Gemini) backend.

pub mod aggregation;
pub mod analytics;
pub mod backend;
pub mod coach;
pub mod config;
pub mod error;
pub mod format;
pub mod load;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod prediction;
pub mod prompts;
pub mod summary;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use aggregation::{AggregationConfig, Aggregator, Granularity, LoadTrend, TrainingWindow};
pub use analytics::{AnalyticsPipeline, TrainingAnalytics};
pub use backend::{build_backend, BackendConfig, BackendProvider, CoachBackend, RateLimitConfig};
pub use coach::{Coach, CoachError, CoachIntent, CoachResponse, DataScope, RetryPolicy};
pub use config::CoachConfig;
pub use error::{BackendError, BackendErrorKind, Result, RunCoachError};
pub use metrics::{MetricsConfig, MetricsEngine, MetricsSnapshot};
pub use prediction::{PredictionConfig, RaceDistance, RacePrediction, RacePredictor};
pub use summary::{CoachContext, Summarizer, SummaryConfig};
pub use zones::ZoneCalculator;
pub use logging::{LogConfig, LogFormat, LogLevel};
