//! Configuration types for the Bloom tutor.
//!
//! One `bloom.json` file configures both sides of the generation contract:
//! the learner-side client (endpoint URL, timeout, store location) and the
//! endpoint's upstream language model.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "bloom.json";

/// Default URL of the lesson generation endpoint.
fn default_generation_endpoint() -> String {
    "http://127.0.0.1:3000/api/generate".to_string()
}

/// Default transport timeout for one generation request, in seconds.
const fn default_request_timeout() -> u64 {
    60
}

/// Default location of the JSON session store.
fn default_store_path() -> String {
    ".bloom/store.json".to_string()
}

/// Default base URL of the upstream model API.
fn default_model_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

/// Default upstream model identifier.
fn default_model_name() -> String {
    "gemini-2.5-flash".to_string()
}

/// Default environment variable holding the upstream API key.
fn default_api_key_env() -> String {
    "BLOOM_MODEL_API_KEY".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_top_p() -> f32 {
    0.9
}

const fn default_max_output_tokens() -> u32 {
    4096
}

/// Main configuration for Bloom.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// URL the learner-side client posts generation requests to.
    #[serde(default = "default_generation_endpoint")]
    pub generation_endpoint: String,

    /// Transport timeout for a single generation request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Path of the JSON session store.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Upstream language model used by the generation endpoint.
    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation_endpoint: default_generation_endpoint(),
            request_timeout_secs: default_request_timeout(),
            store_path: default_store_path(),
            model: ModelConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `bloom.json` in the current directory. If not found, returns
    /// the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `bloom.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON, and `TutorError::ConfigValidationError` if the values are
    /// out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.generation_endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(TutorError::config_validation(
                format!("generationEndpoint must be an http(s) URL, got '{endpoint}'"),
                "Set generationEndpoint to e.g. http://127.0.0.1:3000/api/generate in your bloom.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 in your bloom.json",
            ));
        }

        if self.store_path.trim().is_empty() {
            return Err(TutorError::config_validation(
                "storePath must not be empty",
                "Provide a file path for storePath in your bloom.json",
            ));
        }

        self.model.validate()
    }

    /// Returns the generation request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Upstream language model settings for the generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Base URL of the model API.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model_name")]
    pub model: String,

    /// Environment variable the API key is read from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling probability mass.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Upper bound on generated tokens per lesson.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            model: default_model_name(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl ModelConfig {
    /// Validates the model settings.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.model must not be empty",
                "Name the upstream model, e.g. \"gemini-2.5-flash\"",
            ));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.apiKeyEnv must not be empty",
                "Name the environment variable that holds the model API key",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TutorError::config_validation(
                format!("model.temperature must be within 0..=2, got {}", self.temperature),
                "Use a temperature between 0 and 2 in your bloom.json",
            ));
        }

        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(TutorError::config_validation(
                format!("model.topP must be within (0, 1], got {}", self.top_p),
                "Use a topP between 0 (exclusive) and 1 in your bloom.json",
            ));
        }

        if self.max_output_tokens == 0 {
            return Err(TutorError::config_validation(
                "model.maxOutputTokens must be greater than 0",
                "Set model.maxOutputTokens to at least 1 in your bloom.json",
            ));
        }

        Ok(())
    }

    /// Reads the API key from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::MissingApiKey` if the variable is unset or blank.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(TutorError::missing_api_key(&self.api_key_env)),
        }
    }
}
