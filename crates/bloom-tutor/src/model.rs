//! Upstream language model used by the generation endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{GenerationErrorKind, Result, TutorError};

/// A text-completion model.
#[async_trait]
pub trait LessonModel: Send + Sync {
    /// Completes `user` under the `system` instruction and returns the raw text.
    ///
    /// # Errors
    ///
    /// Returns `Generation` with `Status` for a non-success upstream response,
    /// `Network`/`Timeout` for transport failures, and other variants for
    /// local failures such as missing credentials.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// [`LessonModel`] backed by a Gemini-style `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: Client,
    config: ModelConfig,
}

impl GeminiModel {
    /// Creates a model client with a per-request `timeout`.
    ///
    /// The API key is read from the environment on every request, so the
    /// server starts even when it is not yet set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn new(config: ModelConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            TutorError::config_validation(
                format!("failed to build HTTP client: {e}"),
                "Check the TLS configuration of this machine",
            )
        })?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl LessonModel for GeminiModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self.config.api_key()?;

        let payload = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system }],
            },
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        debug!(model = %self.config.model, "Calling language model");
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Language model returned an error");
            return Err(TutorError::generation(
                GenerationErrorKind::Status(status.as_u16()),
                format!("language model returned {status}"),
            ));
        }

        let body = response.text().await.map_err(transport_error)?;
        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        Ok(parsed.first_text())
    }
}

fn transport_error(e: reqwest::Error) -> TutorError {
    let kind = if e.is_timeout() {
        GenerationErrorKind::Timeout
    } else {
        GenerationErrorKind::Network
    };
    TutorError::generation(kind, format!("language model unreachable: {e}"))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate, or empty.
    fn first_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let payload = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "hello" }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "be kind" }],
            },
            generation_config: GenerationConfig {
                temperature: 0.5,
                top_p: 0.9,
                max_output_tokens: 4096,
                response_mime_type: "application/json",
            },
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be kind");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn test_first_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"title\":\"T\"}"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.first_text(), r#"{"title":"T"}"#);
    }

    #[test]
    fn test_first_text_missing_is_empty() {
        let parsed: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.first_text(), "");

        let parsed: GenerateContentResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(parsed.first_text(), "");
    }

    #[test]
    fn test_url() {
        let config = ModelConfig {
            base_url: "https://example.test/v1beta/".to_string(),
            ..ModelConfig::default()
        };
        let model = GeminiModel::new(config, Duration::from_secs(5)).unwrap();
        assert_eq!(
            model.url(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let config = ModelConfig {
            api_key_env: format!("BLOOM_TEST_UNSET_{}", uuid::Uuid::new_v4().simple()),
            base_url: "http://127.0.0.1:9".to_string(),
            ..ModelConfig::default()
        };
        let model = GeminiModel::new(config, Duration::from_secs(5)).unwrap();

        let err = model.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, TutorError::MissingApiKey { .. }));
    }
}
