//! Client side of the lesson generation contract.
//!
//! The controller only sees [`GenerationClient`]. Every failure comes back as a
//! `TutorError::Generation` with a [`GenerationErrorKind`]; deciding what to do
//! about it (substituting fallback content) is the controller's job.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::{GenerationErrorKind, Result, TutorError};
use crate::lesson::{GenerationRequest, LessonDocument};

/// Produces lesson documents for generation requests.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Requests one lesson document.
    ///
    /// # Errors
    ///
    /// Returns a `Generation` error for a non-success status, a transport
    /// failure, a timeout, or a body that is not a lesson document.
    async fn generate(&self, request: &GenerationRequest) -> Result<LessonDocument>;
}

/// [`GenerationClient`] that POSTs to the generation endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    endpoint: String,
}

impl HttpGenerationClient {
    /// Creates a client for `endpoint` with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            TutorError::config_validation(
                format!("failed to build HTTP client: {e}"),
                "Check the TLS configuration of this machine",
            )
        })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Creates a client from the `generationEndpoint` and `requestTimeoutSecs` settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.generation_endpoint.clone(), config.request_timeout())
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<LessonDocument> {
        debug!(
            endpoint = %self.endpoint,
            topic = %request.topic,
            doc_number = request.doc_number,
            "Requesting lesson"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TutorError::generation(
                GenerationErrorKind::Status(status.as_u16()),
                format!("generation endpoint returned {status}"),
            ));
        }

        let body = response.text().await.map_err(transport_error)?;
        LessonDocument::parse(&body, request.doc_number)
    }
}

fn transport_error(e: reqwest::Error) -> TutorError {
    let kind = if e.is_timeout() {
        GenerationErrorKind::Timeout
    } else {
        GenerationErrorKind::Network
    };
    TutorError::generation(kind, e.to_string())
}
