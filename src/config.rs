use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregation::AggregationConfig;
use crate::analytics::{AnalyticsPipeline, TrainingAnalytics};
use crate::backend::{BackendConfig, BackendProvider};
use crate::coach::{Coach, RetryPolicy};
use crate::error::RunCoachError;
use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::models::AthleteProfile;
use crate::prediction::PredictionConfig;
use crate::summary::SummaryConfig;

/// Environment variable holding the cloud API key
pub const ENV_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable selecting the backend (`local`/`ollama`, `cloud`/`gemini`)
pub const ENV_BACKEND: &str = "RUNCOACH_BACKEND";
/// Environment variable overriding the model id
pub const ENV_MODEL: &str = "RUNCOACH_MODEL";
/// Environment variable overriding the Ollama endpoint
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";

/// Main runcoach configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Athlete profile; required before analytics can run
    pub athlete: Option<AthleteProfile>,

    pub metrics: MetricsConfig,
    pub aggregation: AggregationConfig,
    pub prediction: PredictionConfig,
    pub summary: SummaryConfig,
    pub retry: RetryPolicy,
    pub backend: BackendConfig,
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for CoachConfig {
    fn default() -> Self {
        CoachConfig {
            metadata: ConfigMetadata::default(),
            athlete: None,
            metrics: MetricsConfig::default(),
            aggregation: AggregationConfig::default(),
            prediction: PredictionConfig::default(),
            summary: SummaryConfig::default(),
            retry: RetryPolicy::default(),
            backend: BackendConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl CoachConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: CoachConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;

        Ok(config)
    }

    /// Save configuration to TOML file. The API key is never written.
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("runcoach")
            .join("config.toml")
    }

    /// Load the default file, falling back to defaults, then apply environment overrides
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        let mut config = match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                debug!(path = %config_path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    /// Apply `GEMINI_API_KEY`, `RUNCOACH_BACKEND`, `RUNCOACH_MODEL` and `OLLAMA_HOST`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; empty values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.backend.api_key = Some(key);
        }
        if let Some(name) = get(ENV_BACKEND) {
            match BackendProvider::from_name(&name) {
                Some(provider) => self.backend.provider = provider,
                None => warn!(value = %name, "Ignoring unknown {}", ENV_BACKEND),
            }
        }
        if let Some(model) = get(ENV_MODEL) {
            self.backend.model = Some(model);
        }
        if let Some(host) = get(ENV_OLLAMA_HOST) {
            self.backend.local_endpoint = if host.starts_with("http://") || host.starts_with("https://") {
                host
            } else {
                format!("http://{}", host)
            };
        }
    }

    pub fn validate(&self) -> Result<(), RunCoachError> {
        if let Some(athlete) = &self.athlete {
            athlete.validate()?;
        }
        self.backend.validate()
    }

    /// Analytics pipeline for the configured athlete
    pub fn pipeline(&self) -> Result<AnalyticsPipeline, RunCoachError> {
        let athlete = self.athlete.clone().ok_or_else(|| {
            RunCoachError::Configuration("athlete profile is not configured".to_string())
        })?;
        AnalyticsPipeline::new(
            athlete,
            self.metrics.clone(),
            self.aggregation.clone(),
            self.prediction.clone(),
        )
    }

    /// Coach over `analytics` using the configured backend and retry policy
    pub fn coach(&self, analytics: Arc<TrainingAnalytics>) -> Result<Coach, RunCoachError> {
        Coach::new(
            analytics,
            self.summary.clone(),
            self.retry.clone(),
            self.backend.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn create_test_config() -> CoachConfig {
        CoachConfig {
            athlete: Some(
                AthleteProfile::new(188)
                    .with_resting_hr(48)
                    .with_language(Language::Korean),
            ),
            ..CoachConfig::default()
        }
    }

    #[test]
    fn test_config_serialization() {
        let config = create_test_config();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: CoachConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.athlete, deserialized.athlete);
        assert_eq!(config.prediction, deserialized.prediction);
        assert_eq!(config.aggregation, deserialized.aggregation);
        assert_eq!(config.retry, deserialized.retry);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CoachConfig = toml::from_str(
            r#"
            [athlete]
            max_hr = 185

            [backend]
            provider = "cloud"
            model = "gemini-1.5-pro"

            [retry]
            max_retries = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.athlete.unwrap().max_hr, 185);
        assert_eq!(config.backend.provider, BackendProvider::Cloud);
        assert_eq!(config.backend.resolved_model(), "gemini-1.5-pro");
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.base_backoff_ms, 500);
        assert_eq!(config.summary, SummaryConfig::default());
    }

    #[test]
    fn test_config_file_io_omits_api_key() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = create_test_config();
        original.backend = BackendConfig::cloud("very-secret");
        original.save_to_file(&config_path).unwrap();

        let written = fs::read_to_string(&config_path).unwrap();
        assert!(!written.contains("very-secret"));

        let loaded = CoachConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.backend.provider, BackendProvider::Cloud);
        assert!(loaded.backend.api_key.is_none());
        assert_eq!(loaded.athlete, original.athlete);
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let err = CoachConfig::load_from_file("/nonexistent/runcoach.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/runcoach.toml"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_API_KEY, "env-key"),
            (ENV_BACKEND, "gemini"),
            (ENV_MODEL, "gemini-2.0-flash-lite"),
            (ENV_OLLAMA_HOST, "10.0.0.5:11434"),
        ]
        .into_iter()
        .collect();

        let mut config = CoachConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.api_key.as_deref(), Some("env-key"));
        assert_eq!(config.backend.provider, BackendProvider::Cloud);
        assert_eq!(config.backend.resolved_model(), "gemini-2.0-flash-lite");
        assert_eq!(config.backend.local_endpoint, "http://10.0.0.5:11434");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_backend_override_ignored() {
        let mut config = CoachConfig::default();
        config.apply_overrides(|key| (key == ENV_BACKEND).then(|| "carrier-pigeon".to_string()));
        assert_eq!(config.backend.provider, BackendProvider::Local);
    }

    #[test]
    fn test_pipeline_requires_athlete() {
        let config = CoachConfig::default();
        assert!(matches!(config.pipeline(), Err(RunCoachError::Configuration(_))));
        assert!(create_test_config().pipeline().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        let path = CoachConfig::default_config_path();
        assert!(path.ends_with("runcoach/config.toml"));
    }
}
