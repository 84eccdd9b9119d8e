use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use super::rate_limit::RateLimiter;
use super::{http_client, map_status, BackendConfig, BackendProvider, CoachBackend};
use crate::error::{BackendError, RunCoachError};

/// Header carrying the API key, keeping it out of URLs and access logs
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Google Gemini backend
pub struct CloudBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl CloudBackend {
    /// Backend with its own limiter
    pub fn from_config(config: &BackendConfig) -> Result<Self, RunCoachError> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self::with_limiter(config, limiter)
    }

    /// Backend drawing on a limiter shared with earlier backends of the session
    pub fn with_limiter(config: &BackendConfig, limiter: Arc<RateLimiter>) -> Result<Self, RunCoachError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RunCoachError::Configuration("API key required for the cloud backend".to_string())
            })?;

        Ok(CloudBackend {
            client: http_client(config)?,
            base_url: config.cloud_endpoint.trim_end_matches('/').to_string(),
            model: config.resolved_model().to_string(),
            api_key,
            limiter,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(prompt: &str) -> GeminiRequest<'_> {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        }
    }

    /// Concatenate the text parts of the first candidate
    fn extract_text(body: &str) -> Result<String, BackendError> {
        let response: GeminiResponse = serde_json::from_str(body).map_err(|e| {
            error!(error = %e, "Failed to parse Gemini response");
            BackendError::InvalidResponse(format!("Gemini response: {}", e))
        })?;

        if let Some(err) = response.error {
            return Err(BackendError::InvalidResponse(err.message));
        }

        let candidate = response
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| BackendError::InvalidResponse("no candidates in Gemini response".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BackendError::InvalidResponse(format!(
                "empty Gemini response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

impl Debug for CloudBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CloudBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CoachBackend for CloudBackend {
    fn kind(&self) -> BackendProvider {
        BackendProvider::Cloud
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.chars().count()))]
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.limiter.acquire().await?;

        debug!("Sending request to Gemini API");
        let response = self
            .client
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(BackendError::from)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(BackendError::from)?;

        if !status.is_success() {
            error!(status = %status, "Gemini API error");
            return Err(map_status(status.as_u16(), &body, retry_after.as_deref()));
        }

        let text = Self::extract_text(&body)?;
        debug!(response_chars = text.chars().count(), "Received Gemini response");
        Ok(text)
    }
}
