//! Coaching request orchestration
//!
//! A request moves through `Built → Summarized → Dispatched → Succeeded | Failed`.
//! Analytics are resolved and summarized exactly once per request; retries
//! replay the same prompt against the backend captured at dispatch time.

use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregation::TrainingWindow;
use crate::analytics::TrainingAnalytics;
use crate::backend::{build_backend_with_limiter, BackendConfig, BackendProvider, CoachBackend, RateLimiter};
use crate::error::{backend_user_message, BackendError, BackendErrorKind, CalculationError, RunCoachError};
use crate::metrics::MetricsSnapshot;
use crate::prediction::{RaceDistance, RacePrediction};
use crate::prompts;
use crate::summary::{CoachContext, Summarizer, SummaryConfig, SummaryFocus, SummaryInput};

/// What the athlete asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum CoachIntent {
    ActivityFeedback { activity_id: String },
    WeeklyAnalysis { weeks: usize },
    RaceExplain { target: RaceDistance },
    Question { text: String },
}

/// Analytics an intent needs on top of the snapshots in its data scope
#[derive(Debug, Clone, PartialEq)]
pub struct IntentScope {
    /// Activity that must exist in the data scope
    pub focus_activity: Option<String>,

    /// Restrict windows and snapshots to the last N calendar weeks
    pub recent_weeks: Option<usize>,

    /// Predictions included in the context
    pub race_targets: Vec<RaceDistance>,
}

impl CoachIntent {
    pub fn name(&self) -> &'static str {
        match self {
            CoachIntent::ActivityFeedback { .. } => "activity_feedback",
            CoachIntent::WeeklyAnalysis { .. } => "weekly_analysis",
            CoachIntent::RaceExplain { .. } => "race_explain",
            CoachIntent::Question { .. } => "question",
        }
    }

    /// Calendar weeks a weekly analysis covers, never fewer than one
    pub fn analysis_weeks(&self) -> Option<usize> {
        match self {
            CoachIntent::WeeklyAnalysis { weeks } => Some((*weeks).max(1)),
            _ => None,
        }
    }

    pub fn scope(&self) -> IntentScope {
        match self {
            CoachIntent::ActivityFeedback { activity_id } => IntentScope {
                focus_activity: Some(activity_id.clone()),
                recent_weeks: None,
                race_targets: Vec::new(),
            },
            CoachIntent::WeeklyAnalysis { .. } => IntentScope {
                focus_activity: None,
                recent_weeks: self.analysis_weeks(),
                race_targets: Vec::new(),
            },
            CoachIntent::RaceExplain { target } => IntentScope {
                focus_activity: None,
                recent_weeks: None,
                race_targets: vec![*target],
            },
            CoachIntent::Question { .. } => IntentScope {
                focus_activity: None,
                recent_weeks: None,
                race_targets: Vec::new(),
            },
        }
    }

    fn focus(&self) -> SummaryFocus {
        match self {
            CoachIntent::ActivityFeedback { activity_id } => SummaryFocus::Activity(activity_id.clone()),
            CoachIntent::RaceExplain { .. } => SummaryFocus::Race,
            CoachIntent::WeeklyAnalysis { .. } | CoachIntent::Question { .. } => SummaryFocus::Training,
        }
    }
}

/// Optional inclusive date range limiting the analytics a request sees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataScope {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DataScope {
    pub fn all() -> Self {
        DataScope::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        DataScope {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }

    /// Window shares at least one day with the range
    pub fn overlaps(&self, window: &TrainingWindow) -> bool {
        self.from.map_or(true, |from| window.period_end >= from)
            && self.to.map_or(true, |to| window.period_start <= to)
    }
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff_ms: u64,

    /// Ceiling for computed backoff and provider retry hints
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let computed = Duration::from_millis(self.base_backoff_ms.saturating_mul(1 << exponent));
        let wanted = match hint {
            Some(hint) => computed.max(hint),
            None => computed,
        };
        wanted.min(Duration::from_millis(self.max_backoff_ms))
    }
}

/// Lifecycle of a coaching request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Built,
    Summarized,
    Dispatched,
    Succeeded,
    Failed,
}

/// A single coaching request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachRequest {
    pub id: Uuid,
    pub intent: CoachIntent,
    pub scope: DataScope,
    pub state: RequestState,
}

impl CoachRequest {
    pub fn new(intent: CoachIntent, scope: DataScope) -> Self {
        let request = CoachRequest {
            id: Uuid::new_v4(),
            intent,
            scope,
            state: RequestState::Built,
        };
        debug!(request_id = %request.id, intent = request.intent.name(), state = ?request.state, "Coaching request state");
        request
    }

    fn transition(&mut self, state: RequestState) {
        debug!(request_id = %self.id, from = ?self.state, to = ?state, "Coaching request state");
        self.state = state;
    }
}

/// Successful coaching answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachResponse {
    pub request_id: Uuid,
    pub text: String,

    /// Backend calls made, including the successful one
    pub attempts: u32,
    pub state: RequestState,
    pub backend: BackendProvider,
    pub model: String,

    pub context_chars: usize,
    pub context_truncated: bool,
}

/// Coaching request failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoachError {
    /// The requested activity is not in the analytics for the data scope
    #[error("Activity {activity_id} not found in the selected data")]
    UnknownActivity { activity_id: String },

    /// Backend failed after the retry policy was exhausted or did not apply
    #[error("Backend failed with {kind} error after {attempts} attempt(s): {source}")]
    Backend {
        kind: BackendErrorKind,
        attempts: u32,
        #[source]
        source: BackendError,
    },
}

impl CoachError {
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            CoachError::Backend { source, .. } => Some(source),
            CoachError::UnknownActivity { .. } => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            CoachError::UnknownActivity { activity_id } => format!(
                "Activity {} was not found. Check the activity id and the selected date range.",
                activity_id
            ),
            CoachError::Backend { source, .. } => backend_user_message(source),
        }
    }
}

/// Analytics selected for one request
#[derive(Debug, Default)]
struct ResolvedData {
    snapshots: Vec<MetricsSnapshot>,
    windows: Vec<TrainingWindow>,
    predictions: Vec<(RaceDistance, Result<RacePrediction, CalculationError>)>,
}

struct ActiveBackend {
    config: Arc<BackendConfig>,
    backend: Arc<dyn CoachBackend>,
}

/// Answers coaching intents over one analytics bundle
pub struct Coach {
    analytics: Arc<TrainingAnalytics>,
    summarizer: Summarizer,
    retry: RetryPolicy,
    active: RwLock<ActiveBackend>,

    /// Cloud call log for the whole session, shared by every backend built here
    limiter: Arc<RateLimiter>,
}

impl Coach {
    /// Build the backend described by `backend` and serve `analytics` with it
    pub fn new(
        analytics: Arc<TrainingAnalytics>,
        summary: SummaryConfig,
        retry: RetryPolicy,
        backend: BackendConfig,
    ) -> Result<Self, RunCoachError> {
        let limiter = Arc::new(RateLimiter::new(backend.rate_limit.clone()));
        let handle = build_backend_with_limiter(&backend, &limiter)?;
        let mut coach = Coach::with_backend(analytics, summary, retry, backend, handle);
        coach.limiter = limiter;
        Ok(coach)
    }

    /// Serve `analytics` with an already constructed backend
    pub fn with_backend(
        analytics: Arc<TrainingAnalytics>,
        summary: SummaryConfig,
        retry: RetryPolicy,
        config: BackendConfig,
        backend: Arc<dyn CoachBackend>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Coach {
            analytics,
            summarizer: Summarizer::new(summary),
            retry,
            active: RwLock::new(ActiveBackend {
                config: Arc::new(config),
                backend,
            }),
            limiter,
        }
    }

    pub fn analytics(&self) -> &Arc<TrainingAnalytics> {
        &self.analytics
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Limiter that cloud backends built by this coach draw on
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn read_active(&self) -> RwLockReadGuard<'_, ActiveBackend> {
        self.active.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn backend_config(&self) -> Arc<BackendConfig> {
        Arc::clone(&self.read_active().config)
    }

    pub fn backend_kind(&self) -> BackendProvider {
        self.read_active().backend.kind()
    }

    /// Switch to a backend built from `config`. Analytics are untouched and
    /// requests already dispatched finish on the backend they started with.
    pub fn reconfigure(&self, config: BackendConfig) -> Result<(), RunCoachError> {
        let backend = build_backend_with_limiter(&config, &self.limiter)?;
        if config.provider == BackendProvider::Cloud {
            self.limiter.update_config(config.rate_limit.clone());
        }
        self.replace_backend(config, backend);
        Ok(())
    }

    pub fn replace_backend(&self, config: BackendConfig, backend: Arc<dyn CoachBackend>) {
        info!(provider = %config.provider, model = backend.model(), "Switching coaching backend");
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = ActiveBackend {
            config: Arc::new(config),
            backend,
        };
    }

    /// Build the context for an intent without calling a backend
    pub fn context_for(&self, intent: &CoachIntent, scope: DataScope) -> Result<CoachContext, CoachError> {
        let data = self.resolve(&intent.scope(), scope)?;
        Ok(self.summarize(intent, &data))
    }

    fn summarize(&self, intent: &CoachIntent, data: &ResolvedData) -> CoachContext {
        let input = SummaryInput {
            profile: &self.analytics.profile,
            snapshots: &data.snapshots,
            windows: &data.windows,
            predictions: &data.predictions,
        };
        self.summarizer.summarize(input, &intent.focus())
    }

    fn resolve(&self, intent: &IntentScope, scope: DataScope) -> Result<ResolvedData, CoachError> {
        let analytics = &self.analytics;
        let mut snapshots: Vec<MetricsSnapshot> = analytics
            .snapshots
            .iter()
            .filter(|s| scope.contains(s.start_time.date()))
            .cloned()
            .collect();

        if let Some(activity_id) = &intent.focus_activity {
            if !snapshots.iter().any(|s| &s.activity_id == activity_id) {
                return Err(CoachError::UnknownActivity {
                    activity_id: activity_id.clone(),
                });
            }
        }

        let windows = match intent.recent_weeks {
            Some(count) => {
                let as_of = scope.to.unwrap_or(analytics.as_of);
                let windows = analytics.recent_weeks(as_of, count);
                if let (Some(first), Some(last)) = (windows.first(), windows.last()) {
                    let (start, end) = (first.period_start, last.period_end);
                    snapshots.retain(|s| {
                        let date = s.start_time.date();
                        date >= start && date <= end
                    });
                }
                windows.into_iter().filter(|w| scope.overlaps(w)).collect()
            }
            None => analytics
                .weekly
                .iter()
                .filter(|w| scope.overlaps(w))
                .cloned()
                .collect(),
        };

        let predictions = intent
            .race_targets
            .iter()
            .map(|target| (*target, analytics.predict(*target)))
            .collect();

        Ok(ResolvedData {
            snapshots,
            windows,
            predictions,
        })
    }

    /// Answer an intent over the analytics inside `scope`
    pub async fn ask(&self, intent: CoachIntent, scope: DataScope) -> Result<CoachResponse, CoachError> {
        let mut request = CoachRequest::new(intent, scope);

        let data = match self.resolve(&request.intent.scope(), request.scope) {
            Ok(data) => data,
            Err(err) => {
                request.transition(RequestState::Failed);
                warn!(request_id = %request.id, error = %err, "Coaching request rejected");
                return Err(err);
            }
        };

        let context = self.summarize(&request.intent, &data);
        request.transition(RequestState::Summarized);

        let prompt = prompts::render(&request.intent, &context, self.analytics.profile.language);

        // Capture the backend once; the guard is released before any await
        let (config, backend) = {
            let active = self.read_active();
            (Arc::clone(&active.config), Arc::clone(&active.backend))
        };
        let timeout = config.request_timeout();
        request.transition(RequestState::Dispatched);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(timeout, backend.generate(&prompt)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            };

            match result {
                Ok(text) => {
                    request.transition(RequestState::Succeeded);
                    info!(
                        request_id = %request.id,
                        intent = request.intent.name(),
                        backend = %backend.kind(),
                        attempts,
                        context_chars = context.char_count(),
                        "Coaching request completed"
                    );
                    return Ok(CoachResponse {
                        request_id: request.id,
                        text,
                        attempts,
                        state: request.state,
                        backend: backend.kind(),
                        model: backend.model().to_string(),
                        context_chars: context.char_count(),
                        context_truncated: context.truncated,
                    });
                }
                Err(err) if err.is_retryable() && attempts <= self.retry.max_retries => {
                    let delay = self.retry.backoff(attempts, err.retry_after());
                    warn!(
                        request_id = %request.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    request.transition(RequestState::Failed);
                    error!(
                        request_id = %request.id,
                        kind = %err.kind(),
                        attempts,
                        error = %err,
                        "Coaching request failed"
                    );
                    return Err(CoachError::Backend {
                        kind: err.kind(),
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for Coach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.read_active();
        f.debug_struct("Coach")
            .field("snapshots", &self.analytics.snapshots.len())
            .field("backend", &active.backend.kind())
            .field("model", &active.backend.model())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
