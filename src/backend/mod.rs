//! Inference backends
//!
//! A backend turns a fully rendered prompt into coaching text. Two closed
//! variants exist, selected by [`BackendConfig::provider`]:
//!
//! - [`LocalBackend`]: a model served by Ollama on the same machine
//! - [`CloudBackend`]: Google Gemini, behind a [`RateLimiter`]
//!
//! Backends never see analytics or athlete data beyond the prompt text.

pub mod cloud;
pub mod local;
pub mod rate_limit;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, RunCoachError};

pub use cloud::CloudBackend;
pub use local::{LocalBackend, LocalRuntime, OllamaRuntime};
pub use rate_limit::{RateLimitConfig, RateLimiter};

/// Default Ollama endpoint
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";

/// Default local model
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

/// Base URL of the Gemini API
pub const DEFAULT_CLOUD_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default cloud model
pub const DEFAULT_CLOUD_MODEL: &str = "gemini-2.0-flash";

/// Inference provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    /// Ollama on the local machine
    #[default]
    Local,
    /// Google Gemini
    Cloud,
}

impl BackendProvider {
    /// Parse a provider name, accepting product names as aliases
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "local" | "ollama" => Some(BackendProvider::Local),
            "cloud" | "gemini" => Some(BackendProvider::Cloud),
            _ => None,
        }
    }
}

impl fmt::Display for BackendProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BackendProvider::Local => f.write_str("local"),
            BackendProvider::Cloud => f.write_str("cloud"),
        }
    }
}

/// Backend selection and connection settings.
///
/// Immutable once handed to a coach; reconfiguration builds a new value.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: BackendProvider,

    /// Model id; the provider default is used when absent
    pub model: Option<String>,

    /// Ollama base URL
    pub local_endpoint: String,

    /// Gemini base URL
    pub cloud_endpoint: String,

    /// Gemini API key, never serialized
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Per-call timeout for the local backend, covering model load latency
    pub local_timeout_secs: u64,

    /// Per-call timeout for the cloud backend
    pub cloud_timeout_secs: u64,

    /// TCP connect timeout
    pub connect_timeout_secs: u64,

    /// How long Ollama keeps the model loaded after a call
    pub keep_alive: String,

    /// Cloud request ceilings
    pub rate_limit: RateLimitConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            provider: BackendProvider::Local,
            model: None,
            local_endpoint: DEFAULT_LOCAL_ENDPOINT.to_string(),
            cloud_endpoint: DEFAULT_CLOUD_ENDPOINT.to_string(),
            api_key: None,
            local_timeout_secs: 300,
            cloud_timeout_secs: 60,
            connect_timeout_secs: 10,
            keep_alive: "30m".to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Debug for BackendConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("provider", &self.provider)
            .field("model", &self.resolved_model())
            .field("local_endpoint", &self.local_endpoint)
            .field("cloud_endpoint", &self.cloud_endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("local_timeout_secs", &self.local_timeout_secs)
            .field("cloud_timeout_secs", &self.cloud_timeout_secs)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl BackendConfig {
    pub fn local() -> Self {
        BackendConfig::default()
    }

    pub fn cloud(api_key: impl Into<String>) -> Self {
        BackendConfig {
            provider: BackendProvider::Cloud,
            api_key: Some(api_key.into()),
            ..BackendConfig::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Configured model or the provider default
    pub fn resolved_model(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) if !model.trim().is_empty() => model,
            (_, BackendProvider::Local) => DEFAULT_LOCAL_MODEL,
            (_, BackendProvider::Cloud) => DEFAULT_CLOUD_MODEL,
        }
    }

    /// Timeout the orchestrator applies to each call
    pub fn request_timeout(&self) -> Duration {
        match self.provider {
            BackendProvider::Local => Duration::from_secs(self.local_timeout_secs),
            BackendProvider::Cloud => Duration::from_secs(self.cloud_timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<(), RunCoachError> {
        if self.provider == BackendProvider::Cloud
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(RunCoachError::Configuration(
                "API key required for the cloud backend (set GEMINI_API_KEY)".to_string(),
            ));
        }
        if self.local_timeout_secs == 0 || self.cloud_timeout_secs == 0 {
            return Err(RunCoachError::Configuration(
                "backend timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Produces coaching text from a rendered prompt
#[async_trait]
pub trait CoachBackend: Send + Sync {
    fn kind(&self) -> BackendProvider;

    fn model(&self) -> &str;

    /// One generation call. Cancel-safe: dropping the future aborts the request.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Build the backend selected by the configuration
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn CoachBackend>, RunCoachError> {
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    build_backend_with_limiter(config, &limiter)
}

/// Build the configured backend; cloud calls go through `limiter`
pub fn build_backend_with_limiter(
    config: &BackendConfig,
    limiter: &Arc<RateLimiter>,
) -> Result<Arc<dyn CoachBackend>, RunCoachError> {
    config.validate()?;
    let backend: Arc<dyn CoachBackend> = match config.provider {
        BackendProvider::Local => Arc::new(LocalBackend::from_config(config)?),
        BackendProvider::Cloud => Arc::new(CloudBackend::with_limiter(config, Arc::clone(limiter))?),
    };
    Ok(backend)
}

pub(crate) fn http_client(config: &BackendConfig) -> Result<reqwest::Client, RunCoachError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| RunCoachError::Configuration(format!("failed to build HTTP client: {}", e)))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed { message: String },
    Plain(String),
}

/// Pull a readable message out of an error body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorBody::Detailed { message },
        })
        | Ok(ErrorEnvelope {
            error: ErrorBody::Plain(message),
        }) => message,
        Err(_) => body.chars().take(200).collect(),
    }
}

/// Map a non-success HTTP status to a backend error
pub(crate) fn map_status(status: u16, body: &str, retry_after_header: Option<&str>) -> BackendError {
    let message = error_message(body);
    match status {
        401 | 403 => BackendError::Auth(message),
        429 => {
            let retry_after = retry_after_header
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .or_else(|| parse_retry_hint(&message));
            BackendError::RateLimited {
                message,
                retry_after,
            }
        }
        404 => BackendError::ModelUnavailable(message),
        500..=599 => BackendError::Network(format!("server error {}: {}", status, message)),
        _ => BackendError::InvalidResponse(format!("unexpected status {}: {}", status, message)),
    }
}

/// Parse "Please retry in 6.4s" style hints
pub(crate) fn parse_retry_hint(message: &str) -> Option<Duration> {
    const PREFIX: &str = "Please retry in ";
    let start = message.find(PREFIX)? + PREFIX.len();
    let rest = &message[start..];
    let end = rest.find('s')?;
    let seconds = rest[..end].trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs(seconds.ceil() as u64))
}
