//! Unified error hierarchy for runcoach
//!
//! Local computation errors (`DataError`, `CalculationError`) are recovered at
//! the smallest possible scope by the caller. Backend errors always propagate
//! with their specific kind so presentation code can pick remediation text.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for all runcoach operations
#[derive(Debug, Error)]
pub enum RunCoachError {
    /// Malformed or inconsistent activity data
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    /// Calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Inference backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Coaching request errors
    #[error("Coach error: {0}")]
    Coach(#[from] crate::coach::CoachError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Activity-level data errors. The offending activity is skipped, the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Activity has no identifier
    #[error("Activity is missing an identifier")]
    MissingId,

    /// Duration is zero
    #[error("Activity {activity_id}: duration must be positive")]
    NonPositiveDuration { activity_id: String },

    /// Distance is zero or negative
    #[error("Activity {activity_id}: distance must be positive, got {distance}")]
    NonPositiveDistance {
        activity_id: String,
        distance: String,
    },

    /// A sample series does not line up with the timestamp series
    #[error("Activity {activity_id}: {series} series has {actual} samples, expected {expected}")]
    SeriesLengthMismatch {
        activity_id: String,
        series: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Sample timestamps go backwards
    #[error("Activity {activity_id}: timestamps decrease at sample {index}")]
    NonMonotonicTimestamps { activity_id: String, index: usize },

    /// A derived value does not fit in a decimal
    #[error("Activity {activity_id}: {field} is out of range")]
    ValueOutOfRange {
        activity_id: String,
        field: &'static str,
    },
}

impl DataError {
    /// Identifier of the activity that failed validation, if known
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            DataError::MissingId => None,
            DataError::NonPositiveDuration { activity_id }
            | DataError::NonPositiveDistance { activity_id, .. }
            | DataError::SeriesLengthMismatch { activity_id, .. }
            | DataError::NonMonotonicTimestamps { activity_id, .. }
            | DataError::ValueOutOfRange { activity_id, .. } => Some(activity_id),
        }
    }
}

/// Calculation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    /// Insufficient data for calculation
    #[error("Insufficient data for {calculation}: {reason}")]
    InsufficientData { calculation: String, reason: String },

    /// Invalid parameter
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },
}

/// Failure kinds a backend can report, used for retry policy and remediation text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    Auth,
    RateLimit,
    Network,
    ModelUnavailable,
    InvalidResponse,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendErrorKind::Auth => "authentication",
            BackendErrorKind::RateLimit => "rate limit",
            BackendErrorKind::Network => "network",
            BackendErrorKind::ModelUnavailable => "model unavailable",
            BackendErrorKind::InvalidResponse => "invalid response",
        };
        f.write_str(name)
    }
}

/// Errors returned by inference backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Invalid or expired credential
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider quota or local rate ceiling exceeded
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Transient connectivity failure
    #[error("Network error: {0}")]
    Network(String),

    /// Call did not complete within the caller's timeout
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Local model not running or not loaded, or model id unknown to the provider
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Provider answered but the body could not be interpreted
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn kind(&self) -> BackendErrorKind {
        match self {
            BackendError::Auth(_) => BackendErrorKind::Auth,
            BackendError::RateLimited { .. } => BackendErrorKind::RateLimit,
            BackendError::Network(_) | BackendError::Timeout(_) => BackendErrorKind::Network,
            BackendError::ModelUnavailable(_) => BackendErrorKind::ModelUnavailable,
            BackendError::InvalidResponse(_) => BackendErrorKind::InvalidResponse,
        }
    }

    /// Rate limit and network failures are worth replaying; everything else is not
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            BackendErrorKind::RateLimit | BackendErrorKind::Network
        )
    }

    /// Provider-suggested wait before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        BackendError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

/// Result type alias for runcoach operations
pub type Result<T> = std::result::Result<T, RunCoachError>;

impl RunCoachError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RunCoachError::Backend(err) => err.is_retryable(),
            RunCoachError::Coach(err) => err.backend_error().is_some_and(BackendError::is_retryable),
            RunCoachError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RunCoachError::Data(_) => ErrorSeverity::Warning,
            RunCoachError::Calculation(CalculationError::InsufficientData { .. }) => {
                ErrorSeverity::Info
            }
            RunCoachError::Calculation(_) => ErrorSeverity::Warning,
            RunCoachError::Backend(err) => match err.kind() {
                BackendErrorKind::RateLimit | BackendErrorKind::Network => ErrorSeverity::Warning,
                _ => ErrorSeverity::Error,
            },
            RunCoachError::Coach(err) => match err.backend_error() {
                Some(backend) => RunCoachError::Backend(backend.clone()).severity(),
                None => ErrorSeverity::Warning,
            },
            RunCoachError::Configuration(_) => ErrorSeverity::Error,
            RunCoachError::Io(_) => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RunCoachError::Backend(err) => backend_user_message(err),
            RunCoachError::Coach(err) => err.user_message(),
            RunCoachError::Calculation(CalculationError::InsufficientData { calculation, .. }) => {
                format!(
                    "Not enough data to calculate {}. Record a few more runs and try again.",
                    calculation
                )
            }
            RunCoachError::Data(err) => format!("An activity could not be analysed: {}", err),
            _ => self.to_string(),
        }
    }
}

/// Remediation text for a backend failure, distinct per kind
pub fn backend_user_message(err: &BackendError) -> String {
    match err.kind() {
        BackendErrorKind::Auth => {
            "The AI service rejected the API key. Check that the key is valid and has not expired."
                .to_string()
        }
        BackendErrorKind::RateLimit => match err.retry_after() {
            Some(wait) => format!(
                "AI service quota exceeded. Please try again in {} seconds.",
                wait.as_secs().max(1)
            ),
            None => "AI service quota exceeded. Please wait a moment and try again later.".to_string(),
        },
        BackendErrorKind::Network => {
            "Could not reach the AI service. Check your network connection and try again.".to_string()
        }
        BackendErrorKind::ModelUnavailable => {
            "The AI model is not available. For a local backend, make sure Ollama is running \
             (`ollama serve`) and the model is pulled (`ollama pull <model>`)."
                .to_string()
        }
        BackendErrorKind::InvalidResponse => {
            "The AI service returned an unexpected response. Please try again.".to_string()
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = RunCoachError::Data(DataError::MissingId);
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = RunCoachError::Calculation(CalculationError::InsufficientData {
            calculation: "marathon prediction".to_string(),
            reason: "insufficient history".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Info);

        let err = RunCoachError::Backend(BackendError::Auth("bad key".to_string()));
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }

    #[test]
    fn test_backend_retry_classification() {
        assert!(BackendError::rate_limited("quota").is_retryable());
        assert!(BackendError::Network("reset".to_string()).is_retryable());
        assert!(BackendError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!BackendError::Auth("expired".to_string()).is_retryable());
        assert!(!BackendError::ModelUnavailable("llama3.2".to_string()).is_retryable());
        assert!(!BackendError::InvalidResponse("empty".to_string()).is_retryable());
    }

    #[test]
    fn test_timeout_is_network_kind() {
        let err = BackendError::Timeout(Duration::from_secs(30));
        assert_eq!(err.kind(), BackendErrorKind::Network);
    }

    #[test]
    fn test_user_messages_are_distinct_per_kind() {
        let errors = [
            BackendError::Auth("x".to_string()),
            BackendError::rate_limited("x"),
            BackendError::Network("x".to_string()),
            BackendError::ModelUnavailable("x".to_string()),
        ];
        let messages: Vec<String> = errors.iter().map(backend_user_message).collect();
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(messages[3].contains("ollama"));
    }

    #[test]
    fn test_rate_limit_message_uses_retry_hint() {
        let err = BackendError::RateLimited {
            message: "quota".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert!(backend_user_message(&err).contains("7 seconds"));
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = RunCoachError::Calculation(CalculationError::InsufficientData {
            calculation: "half marathon prediction".to_string(),
            reason: "insufficient history".to_string(),
        });
        assert!(err.user_message().contains("Not enough data"));
        assert!(!err.is_retryable());
    }
}
