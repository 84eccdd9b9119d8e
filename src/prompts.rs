//! Prompt templates per coaching intent

use rust_decimal::Decimal;

use crate::coach::CoachIntent;
use crate::models::Language;
use crate::prediction::RaceDistance;
use crate::summary::CoachContext;

/// Instruction appended to every prompt so the model answers in the athlete's language
pub fn language_instruction(language: Language) -> &'static str {
    match language {
        Language::English => "Please respond in English.",
        Language::Korean => "한국어로 답변해 주세요.",
    }
}

fn race_distance_name(target: RaceDistance) -> String {
    match target {
        RaceDistance::FiveK => "5 kilometers".to_string(),
        RaceDistance::TenK => "10 kilometers".to_string(),
        RaceDistance::HalfMarathon => "21.1 kilometers (half marathon)".to_string(),
        RaceDistance::Marathon => "42.195 kilometers (marathon)".to_string(),
        RaceDistance::Custom(meters) => {
            format!("{} kilometers", (meters / Decimal::from(1000)).normalize())
        }
    }
}

fn truncation_note(context: &CoachContext) -> &'static str {
    if context.truncated {
        "\nNote: the training data above was cut to fit; some details are missing.\n"
    } else {
        ""
    }
}

/// Render the full prompt for an intent. The same inputs always give the same string.
pub fn render(intent: &CoachIntent, context: &CoachContext, language: Language) -> String {
    let body = match intent {
        CoachIntent::ActivityFeedback { activity_id } => format!(
            "Analyze this running activity and provide coaching feedback.\n\
             The activity to review is [{activity_id}], listed under \"Focus activity\".\n\n\
             **Training Data:**\n{data}{note}\n\
             Please provide:\n\
             1. **Performance Summary**: Brief assessment of this run\n\
             2. **Heart Rate Analysis**: Zone analysis if HR data available\n\
             3. **Pace Consistency**: Assessment of pacing strategy\n\
             4. **Recovery Recommendation**: Suggested recovery based on intensity\n\
             5. **Training Tip**: One specific tip to improve\n\n\
             Keep the response concise and actionable (under 300 words).",
            activity_id = activity_id,
            data = context.text,
            note = truncation_note(context),
        ),
        CoachIntent::WeeklyAnalysis { .. } => format!(
            "Analyze this runner's training pattern and provide coaching feedback:\n\n\
             **Weekly Training Summary (Last {weeks}):**\n{data}{note}\n\
             Please provide:\n\
             1. **Training Load Assessment**: Is the weekly volume appropriate? Any signs of overtraining?\n\
             2. **Consistency Analysis**: How consistent is the training pattern?\n\
             3. **Progress Trend**: Any improvement or decline in performance?\n\
             4. **Recommended Focus**: What should this runner focus on next week?\n\
             5. **Suggested Workout**: One specific workout recommendation\n\n\
             Keep the response practical and motivating (under 400 words).",
            weeks = match intent.analysis_weeks().unwrap_or(1) {
                1 => "1 week".to_string(),
                n => format!("{} weeks", n),
            },
            data = context.text,
            note = truncation_note(context),
        ),
        CoachIntent::RaceExplain { target } => format!(
            "Based on this runner's recent training data, explain their potential race time\n\
             for {distance}:\n\n\
             **Training Data and Model Predictions:**\n{data}{note}\n\
             Please provide:\n\
             1. **Predicted Finish Time**: Estimated time range\n\
             2. **Confidence Level**: How reliable is this prediction?\n\
             3. **Key Factors**: What training aspects influenced this prediction?\n\
             4. **Race Day Tips**: 2-3 specific tips for race day\n\
             5. **Training Gap**: What training might help improve the prediction?\n\n\
             Be realistic and base predictions on the actual training data shown. \
             If a prediction is marked as insufficient history, say so instead of guessing.",
            distance = race_distance_name(*target),
            data = context.text,
            note = truncation_note(context),
        ),
        CoachIntent::Question { text } => format!(
            "You are an experienced running coach. A runner has the following question:\n\n\
             **Runner Profile:**\n{data}{note}\n\
             **Question:**\n{question}\n\n\
             Please provide helpful, evidence-based coaching advice.\n\
             Keep the response focused and practical (under 300 words).",
            data = if context.text.trim().is_empty() {
                "No specific data provided.\n"
            } else {
                context.text.as_str()
            },
            note = truncation_note(context),
            question = text.trim(),
        ),
    };

    format!("{}\n\n{}", body, language_instruction(language))
}
