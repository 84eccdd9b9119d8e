use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{http_client, map_status, BackendConfig, BackendProvider, CoachBackend};
use crate::error::{BackendError, RunCoachError};

/// Model runtime behind the local backend
#[async_trait]
pub trait LocalRuntime: Send + Sync + 'static {
    /// Make sure the model exists and load it into memory
    async fn load(&self, model: &str) -> Result<(), BackendError>;

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    keep_alive: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ollama HTTP API
#[derive(Debug, Clone)]
pub struct OllamaRuntime {
    client: reqwest::Client,
    base_url: String,
    keep_alive: String,
}

impl OllamaRuntime {
    pub fn from_config(config: &BackendConfig) -> Result<Self, RunCoachError> {
        Ok(OllamaRuntime {
            client: http_client(config)?,
            base_url: config.local_endpoint.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
        })
    }

    /// Connection failures mean Ollama itself is not running
    fn transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_connect() {
            BackendError::ModelUnavailable(format!(
                "Ollama is not reachable at {}; start it with `ollama serve`",
                self.base_url
            ))
        } else {
            BackendError::from(err)
        }
    }

    async fn post_generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            keep_alive: &self.keep_alive,
        };
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(BackendError::from)?;
        if !status.is_success() {
            return Err(map_status(status.as_u16(), &body, None));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("Ollama response: {}", e)))?;
        Ok(parsed.response)
    }
}

/// Whether a tag from `/api/tags` names the requested model
fn tag_matches(tag: &str, model: &str) -> bool {
    tag == model || (!model.contains(':') && tag.strip_prefix(model) == Some(":latest"))
}

#[async_trait]
impl LocalRuntime for OllamaRuntime {
    async fn load(&self, model: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(BackendError::from)?;
        if !status.is_success() {
            return Err(map_status(status.as_u16(), &body, None));
        }

        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("Ollama tags: {}", e)))?;
        if !tags.models.iter().any(|tag| tag_matches(&tag.name, model)) {
            return Err(BackendError::ModelUnavailable(format!(
                "model {} is not installed; run `ollama pull {}`",
                model, model
            )));
        }

        // An empty prompt loads the model without generating
        self.post_generate(model, "").await.map(|_| ())
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
        self.post_generate(model, prompt).await
    }
}

/// A model loaded into the local runtime
#[derive(Debug)]
pub struct WarmModel {
    pub model: String,
    pub loaded_at: Instant,
}

/// Local backend; the model is loaded at most once per backend instance
pub struct LocalBackend<R: LocalRuntime = OllamaRuntime> {
    runtime: R,
    model: String,
    warm: OnceCell<Arc<WarmModel>>,
}

impl LocalBackend<OllamaRuntime> {
    pub fn from_config(config: &BackendConfig) -> Result<Self, RunCoachError> {
        Ok(LocalBackend::with_runtime(
            OllamaRuntime::from_config(config)?,
            config.resolved_model(),
        ))
    }
}

impl<R: LocalRuntime> LocalBackend<R> {
    pub fn with_runtime(runtime: R, model: impl Into<String>) -> Self {
        LocalBackend {
            runtime,
            model: model.into(),
            warm: OnceCell::new(),
        }
    }

    pub fn is_warm(&self) -> bool {
        self.warm.initialized()
    }

    /// Load the model once; concurrent first callers wait on the same load.
    /// A failed load is not cached and the next call tries again.
    pub async fn warm_up(&self) -> Result<Arc<WarmModel>, BackendError> {
        let warm = self
            .warm
            .get_or_try_init(|| async {
                info!(model = %self.model, "Loading local model");
                self.runtime.load(&self.model).await?;
                Ok::<_, BackendError>(Arc::new(WarmModel {
                    model: self.model.clone(),
                    loaded_at: Instant::now(),
                }))
            })
            .await?;
        Ok(Arc::clone(warm))
    }
}

impl<R: LocalRuntime> std::fmt::Debug for LocalBackend<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("model", &self.model)
            .field("warm", &self.is_warm())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R: LocalRuntime> CoachBackend for LocalBackend<R> {
    fn kind(&self) -> BackendProvider {
        BackendProvider::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_chars = prompt.chars().count()))]
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let warm = self.warm_up().await?;
        debug!(loaded_for = ?warm.loaded_at.elapsed(), "Generating with local model");
        let text = self.runtime.generate(&warm.model, prompt).await?;
        if text.trim().is_empty() {
            return Err(BackendError::InvalidResponse(
                "local model returned an empty response".to_string(),
            ));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Runtime that counts loads and takes a while to load
    #[derive(Default)]
    struct CountingRuntime {
        loads: AtomicUsize,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl LocalRuntime for CountingRuntime {
        async fn load(&self, _model: &str) -> Result<(), BackendError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::ModelUnavailable("not pulled".to_string()));
            }
            Ok(())
        }

        async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
            Ok(format!("{} says: {}", model, prompt))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_warm_up_under_concurrent_first_use() {
        let backend = Arc::new(LocalBackend::with_runtime(CountingRuntime::default(), "llama3.2"));

        let first = tokio::spawn({
            let backend = Arc::clone(&backend);
            async move { backend.generate("one").await }
        });
        let second = tokio::spawn({
            let backend = Arc::clone(&backend);
            async move { backend.generate("two").await }
        });

        assert_eq!(first.await.unwrap().unwrap(), "llama3.2 says: one");
        assert_eq!(second.await.unwrap().unwrap(), "llama3.2 says: two");
        assert_eq!(backend.runtime.loads.load(Ordering::SeqCst), 1);
        assert!(backend.is_warm());

        backend.generate("three").await.unwrap();
        assert_eq!(backend.runtime.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_warm_up_is_retried() {
        let runtime = CountingRuntime {
            failures_left: AtomicUsize::new(1),
            ..CountingRuntime::default()
        };
        let backend = LocalBackend::with_runtime(runtime, "llama3.2");

        let err = backend.generate("hi").await.unwrap_err();
        assert!(matches!(err, BackendError::ModelUnavailable(_)));
        assert!(!backend.is_warm());

        assert!(backend.generate("hi").await.is_ok());
        assert_eq!(backend.runtime.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tag_matching() {
        assert!(tag_matches("llama3.2:latest", "llama3.2"));
        assert!(tag_matches("llama3.2:3b", "llama3.2:3b"));
        assert!(!tag_matches("llama3.2:3b", "llama3.2"));
        assert!(!tag_matches("llama3.1:latest", "llama3.2"));
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_model_unavailable() {
        let config = BackendConfig {
            local_endpoint: "http://127.0.0.1:1".to_string(),
            connect_timeout_secs: 2,
            ..BackendConfig::default()
        };
        let backend = LocalBackend::from_config(&config).unwrap();

        let err = backend.generate("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::ModelUnavailable(message) if message.contains("ollama serve")));
    }
}
