//! Bounded coaching context
//!
//! The summarizer turns analytics into a text payload that never exceeds a
//! character budget. Content is added in a fixed priority order:
//!
//! 1. required block: athlete header, focus (or most recent) activity in full,
//!    most recent window in full, race predictions for race focus
//! 2. further recent activities in full, newest first
//! 3. older windows as one-line aggregates, newest first
//! 4. one line aggregating all remaining activities
//!
//! Each stage stops at the first entry that does not fit. When the required
//! block alone exceeds the budget the context is marked truncated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregation::{Granularity, TrainingWindow};
use crate::error::CalculationError;
use crate::format::{format_distance, format_duration, format_elevation, format_pace_with_unit};
use crate::metrics::MetricsSnapshot;
use crate::models::{AthleteProfile, Units};
use crate::prediction::{RaceDistance, RacePrediction};

/// Marker prefixed to contexts whose required content did not fit
pub const TRUNCATED_MARKER: &str = "[TRUNCATED]";

/// Summarizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Maximum size of the context in characters
    pub max_chars: usize,

    /// Number of recent activities rendered in full
    pub recent_activities: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        SummaryConfig {
            max_chars: 6000,
            recent_activities: 5,
        }
    }
}

/// What the context should put first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryFocus {
    /// One activity is discussed in detail
    Activity(String),
    /// Training pattern over recent windows
    Training,
    /// Race predictions are part of the required block
    Race,
}

/// Borrowed analytics handed to the summarizer
#[derive(Debug, Clone, Copy)]
pub struct SummaryInput<'a> {
    pub profile: &'a AthleteProfile,
    pub snapshots: &'a [MetricsSnapshot],
    pub windows: &'a [TrainingWindow],
    pub predictions: &'a [(RaceDistance, Result<RacePrediction, CalculationError>)],
}

/// Bounded text payload for a language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachContext {
    pub text: String,

    /// Required content was cut to fit the budget
    pub truncated: bool,

    /// Activities rendered in full
    pub activities_in_full: usize,

    /// Windows included, in full or as one-liners
    pub windows_included: usize,

    /// Activities only counted in the aggregate line
    pub activities_aggregated: usize,
}

impl CoachContext {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Appends lines while they fit the budget
struct BudgetWriter {
    text: String,
    used: usize,
    budget: usize,
}

impl BudgetWriter {
    fn new(budget: usize) -> Self {
        BudgetWriter {
            text: String::new(),
            used: 0,
            budget,
        }
    }

    /// Add a block of lines atomically; returns false if it does not fit
    fn try_push(&mut self, block: &str) -> bool {
        let needed = block.chars().count() + 1;
        if self.used + needed > self.budget {
            return false;
        }
        self.text.push_str(block);
        self.text.push('\n');
        self.used += needed;
        true
    }
}

/// Builds bounded coaching contexts
#[derive(Debug, Clone, Default)]
pub struct Summarizer {
    config: SummaryConfig,
}

impl Summarizer {
    pub fn new(config: SummaryConfig) -> Self {
        Summarizer { config }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    pub fn summarize(&self, input: SummaryInput<'_>, focus: &SummaryFocus) -> CoachContext {
        let units = input.profile.preferred_units;
        let budget = self.config.max_chars;

        // Newest first, deterministic on equal start times
        let mut activities: Vec<&MetricsSnapshot> = input.snapshots.iter().collect();
        activities.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.activity_id.cmp(&b.activity_id))
        });
        let mut windows: Vec<&TrainingWindow> = input.windows.iter().collect();
        windows.sort_by(|a, b| b.period_start.cmp(&a.period_start));

        let lead = match focus {
            SummaryFocus::Activity(id) => activities
                .iter()
                .position(|s| &s.activity_id == id)
                .or(if activities.is_empty() { None } else { Some(0) }),
            _ => {
                if activities.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
        };

        let required = self.required_block(&input, focus, &activities, lead, &windows, units);
        let required_chars = required.chars().count() + 1;
        if required_chars > budget {
            warn!(
                required = required_chars,
                budget, "Required coaching context exceeds budget, truncating"
            );
            let marked = format!("{}\n{}", TRUNCATED_MARKER, required);
            return CoachContext {
                text: marked.chars().take(budget).collect(),
                truncated: true,
                activities_in_full: lead.map_or(0, |_| 1),
                windows_included: usize::from(!windows.is_empty()),
                activities_aggregated: 0,
            };
        }

        let mut writer = BudgetWriter::new(budget);
        writer.try_push(&required);
        let mut in_full = lead.map_or(0, |_| 1);
        let mut shown = vec![false; activities.len()];
        if let Some(index) = lead {
            shown[index] = true;
        }

        // Further recent activities in full
        let mut heading_written = false;
        for (index, snapshot) in activities.iter().enumerate() {
            if in_full >= self.config.recent_activities {
                break;
            }
            if shown[index] {
                continue;
            }
            let mut block = String::new();
            if !heading_written {
                block.push_str("Other recent activities:\n");
            }
            block.push_str(&activity_block(snapshot, units));
            if !writer.try_push(&block) {
                break;
            }
            heading_written = true;
            shown[index] = true;
            in_full += 1;
        }

        // Older windows as one-liners
        let mut windows_included = usize::from(!windows.is_empty());
        let mut heading_written = false;
        for window in windows.iter().skip(1) {
            let mut line = String::new();
            if !heading_written {
                line.push_str("Earlier periods:\n");
            }
            line.push_str(&window_line(window, units));
            if !writer.try_push(&line) {
                break;
            }
            heading_written = true;
            windows_included += 1;
        }

        // Everything else as one aggregate line
        let remaining: Vec<&&MetricsSnapshot> = activities
            .iter()
            .zip(&shown)
            .filter(|(_, shown)| !**shown)
            .map(|(snapshot, _)| snapshot)
            .collect();
        let mut activities_aggregated = 0;
        if !remaining.is_empty() {
            let distance: Decimal = remaining.iter().map(|s| s.distance_meters).sum();
            let seconds: u64 = remaining.iter().map(|s| s.duration_seconds as u64).sum();
            let line = format!(
                "Other activities: {} runs, {}, {} total",
                remaining.len(),
                format_distance(distance, units),
                format_duration(seconds)
            );
            if writer.try_push(&line) {
                activities_aggregated = remaining.len();
            }
        }

        debug!(
            chars = writer.used,
            budget,
            in_full,
            windows_included,
            activities_aggregated,
            "Built coaching context"
        );

        CoachContext {
            text: writer.text,
            truncated: false,
            activities_in_full: in_full,
            windows_included,
            activities_aggregated,
        }
    }

    fn required_block(
        &self,
        input: &SummaryInput<'_>,
        focus: &SummaryFocus,
        activities: &[&MetricsSnapshot],
        lead: Option<usize>,
        windows: &[&TrainingWindow],
        units: Units,
    ) -> String {
        let mut lines = Vec::new();
        lines.push(profile_line(input.profile));

        match (activities.last(), activities.first()) {
            (Some(oldest), Some(newest)) => lines.push(format!(
                "History: {} activities from {} to {}",
                activities.len(),
                oldest.start_time.date(),
                newest.start_time.date()
            )),
            _ => lines.push("History: no activities recorded".to_string()),
        }

        if let Some(index) = lead {
            let heading = match focus {
                SummaryFocus::Activity(_) => "Focus activity:",
                _ => "Most recent activity:",
            };
            lines.push(heading.to_string());
            lines.push(activity_block(activities[index], units));
        }

        if let Some(window) = windows.first() {
            lines.push(match window.granularity {
                Granularity::Week => "Most recent week:".to_string(),
                Granularity::Month => "Most recent month:".to_string(),
            });
            lines.push(window_block(window, units));
        }

        if *focus == SummaryFocus::Race {
            lines.push("Race predictions:".to_string());
            if input.predictions.is_empty() {
                lines.push("  none requested".to_string());
            }
            for (target, result) in input.predictions {
                lines.push(prediction_line(*target, result, units));
            }
        }

        lines.join("\n")
    }
}

fn profile_line(profile: &AthleteProfile) -> String {
    let resting = profile
        .resting_hr
        .map(|hr| format!("{} bpm", hr))
        .unwrap_or_else(|| "unknown".to_string());
    let units = match profile.preferred_units {
        Units::Metric => "metric",
        Units::Imperial => "imperial",
    };
    format!(
        "Athlete: max HR {} bpm, resting HR {}, units {}",
        profile.max_hr, resting, units
    )
}

fn optional<T: std::fmt::Display>(value: Option<T>, suffix: &str) -> String {
    match value {
        Some(value) => format!("{}{}", value, suffix),
        None => "N/A".to_string(),
    }
}

/// Multi-line rendering of one activity
fn activity_block(snapshot: &MetricsSnapshot, units: Units) -> String {
    let title = snapshot
        .name
        .as_ref()
        .map(|name| format!(" \"{}\"", name))
        .unwrap_or_default();

    let zones = match snapshot.hr_zones.percentages() {
        Some(percentages) => percentages
            .iter()
            .enumerate()
            .map(|(i, pct)| format!("Z{} {}%", i + 1, pct.round()))
            .collect::<Vec<_>>()
            .join(" "),
        None => "unknown".to_string(),
    };

    format!(
        "- {}{} ({:?}) [{}]\n  Distance {} | Time {} | Avg pace {} | Best pace {}\n  Avg HR {} | Max HR {} | Elevation {} | Efficiency {} | Calories {}\n  HR zones: {}",
        snapshot.start_time.format("%Y-%m-%d %H:%M"),
        title,
        snapshot.sport,
        snapshot.activity_id,
        format_distance(snapshot.distance_meters, units),
        format_duration(snapshot.duration_seconds as u64),
        format_pace_with_unit(Some(snapshot.avg_pace), units),
        format_pace_with_unit(snapshot.max_pace, units),
        optional(snapshot.avg_heart_rate, " bpm"),
        optional(snapshot.max_heart_rate, " bpm"),
        snapshot
            .elevation_gain
            .map(|gain| format_elevation(gain, units))
            .unwrap_or_else(|| "N/A".to_string()),
        optional(snapshot.efficiency_index, ""),
        optional(snapshot.calories, ""),
        zones
    )
}

fn period_label(window: &TrainingWindow) -> String {
    match window.granularity {
        Granularity::Week => format!("Week of {}", window.period_start),
        Granularity::Month => format!("Month of {}", window.period_start.format("%Y-%m")),
    }
}

/// Full rendering of one window
fn window_block(window: &TrainingWindow, units: Units) -> String {
    let ratio = window
        .acute_chronic_ratio
        .map(|r| format!(" (acute:chronic {})", r.round_dp(2)))
        .unwrap_or_default();
    format!(
        "- {} to {}: {} runs, {}, {}, avg pace {}, avg HR {}, elevation {}, load {}, trend {}{}",
        period_label(window),
        window.period_end,
        window.activity_count,
        format_distance(window.total_distance_meters, units),
        format_duration(window.total_duration_seconds),
        format_pace_with_unit(window.avg_pace, units),
        optional(window.avg_heart_rate, " bpm"),
        format_elevation(window.total_elevation_gain, units),
        window.training_load.round_dp(1),
        window.trend.description(),
        ratio
    )
}

/// One-line aggregate of an older window
fn window_line(window: &TrainingWindow, units: Units) -> String {
    format!(
        "- {}: {} runs, {}, avg pace {}, load {}",
        period_label(window),
        window.activity_count,
        format_distance(window.total_distance_meters, units),
        format_pace_with_unit(window.avg_pace, units),
        window.training_load.round_dp(1)
    )
}

fn prediction_line(
    target: RaceDistance,
    result: &Result<RacePrediction, CalculationError>,
    units: Units,
) -> String {
    match result {
        Ok(prediction) => format!(
            "- {}: {} ({}), confidence {:?} ({}), from {} of {} on {} ({} qualifying efforts)",
            target.label(),
            format_duration(prediction.predicted_seconds as u64),
            format_pace_with_unit(Some(prediction.predicted_pace), units),
            prediction.confidence,
            prediction.confidence_score,
            format_distance(prediction.baseline.distance_meters, units),
            format_duration(prediction.baseline.duration_seconds as u64),
            prediction.baseline.date,
            prediction.qualifying_efforts
        ),
        Err(CalculationError::InsufficientData { .. }) => {
            format!("- {}: insufficient history", target.label())
        }
        Err(err) => format!("- {}: unavailable ({})", target.label(), err),
    }
}
