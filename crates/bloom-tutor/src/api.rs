//! HTTP generation endpoint.
//!
//! Translates lesson generation requests into prompts for the upstream
//! language model and its replies into lesson documents.
//!
//! # Endpoints
//!
//! - `POST /api/generate` - Generate one lesson document
//! - `OPTIONS /api/generate` - CORS preflight
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bloom_tutor::{create_router, AppState, Config, GeminiModel};
//!
//! # async fn example() -> bloom_tutor::Result<()> {
//! let config = Config::default();
//! let model = GeminiModel::new(config.model.clone(), config.request_timeout())?;
//! let router = create_router(AppState::new(config, Arc::new(model)));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::{GenerationErrorKind, TutorError};
use crate::lesson::{
    default_difficulty, GenerationRequest, LessonDocument, FALLBACK_QUESTIONS, TOPIC_PLACEHOLDER,
};
use crate::model::LessonModel;
use crate::prompt::{user_message, SYSTEM_PROMPT};
use crate::Config;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the generate endpoint.
///
/// Every field is optional on the wire so that a missing topic is reported as
/// such rather than as a malformed body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    /// Subject being learned.
    #[serde(default)]
    pub topic: Option<String>,
    /// Number of the document to generate; defaults to 1.
    #[serde(default)]
    pub doc_number: Option<u32>,
    /// Answers from the previous round.
    #[serde(default)]
    pub previous_answers: Option<Vec<String>>,
    /// Questions from the previous round.
    #[serde(default)]
    pub previous_questions: Option<Vec<String>>,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short error category.
    pub error: String,
    /// Upstream failure detail (502 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Failure description (500 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the endpoint.
    pub config: Config,
    /// Upstream language model.
    pub model: Arc<dyn LessonModel>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates a new `AppState`.
    #[must_use]
    pub fn new(config: Config, model: Arc<dyn LessonModel>) -> Self {
        Self { config, model }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The request body is unusable.
    BadRequest(String),
    /// The upstream model failed.
    Upstream(String),
    /// Anything else.
    Internal(String),
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        match err {
            TutorError::Generation {
                kind: GenerationErrorKind::Status(code),
                ..
            } => Self::Upstream(format!("Status {code}")),
            TutorError::Generation { message, .. } => Self::Upstream(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest(error) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error,
                    details: None,
                    message: None,
                },
            ),
            Self::Upstream(details) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: "AI service error".to_string(),
                    details: Some(details),
                    message: None,
                },
            ),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "Internal server error".to_string(),
                    details: None,
                    message: Some(message),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router.
///
/// The router answers CORS preflight for any origin with methods POST and
/// OPTIONS and the Content-Type header, and logs every request.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/generate",
            post(handle_generate).options(|| async { StatusCode::OK }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/generate`.
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<LessonDocument>, ApiError> {
    let body: GenerateBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;

    let topic = body
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Topic is required".to_string()))?
        .to_string();

    let request = GenerationRequest {
        topic,
        doc_number: body.doc_number.unwrap_or(1).max(1),
        previous_answers: body.previous_answers,
        previous_questions: body.previous_questions,
    };

    info!(
        topic = %request.topic,
        doc_number = request.doc_number,
        model = %state.config.model.model,
        "Generating lesson"
    );

    let text = state
        .model
        .complete(SYSTEM_PROMPT, &user_message(&request))
        .await
        .map_err(|e| {
            warn!(error = %e, topic = %request.topic, "Language model call failed");
            ApiError::from(e)
        })?;

    let document = LessonDocument::parse(&text, request.doc_number).unwrap_or_else(|e| {
        warn!(error = %e, raw = %text, "Model output is not a lesson, salvaging raw text");
        salvage_document(&request, &text)
    });

    Ok(Json(document))
}

/// Wraps unparsable model text in a lesson document.
fn salvage_document(request: &GenerationRequest, raw: &str) -> LessonDocument {
    LessonDocument {
        title: format!("{} - Lesson #{}", request.topic, request.doc_number),
        content: format!("<p>{}</p>", raw.replace('\n', "</p><p>")),
        questions: FALLBACK_QUESTIONS
            .iter()
            .map(|q| q.replace(TOPIC_PLACEHOLDER, &request.topic))
            .collect(),
        difficulty_level: default_difficulty(request.doc_number),
        mastery_estimate: Some(0),
    }
}

// ============================================================================
// Tests
// ============================================================================
