//! Error types for the Bloom tutor.
//!
//! This module defines the error hierarchy for configuration loading, lesson
//! generation, persistence and the generation endpoint. Learner-facing input
//! problems are not errors here; they are [`ValidationError`] values returned
//! inside controller outcomes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A specialized `Result` type for tutor operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while running the adaptive loop or the endpoint.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your bloom.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Generation Errors
    // ========================================================================
    /// The lesson generation call failed or produced unusable output.
    #[error("Lesson generation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    Generation {
        /// The kind of failure.
        kind: GenerationErrorKind,
        /// Detailed failure description.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    /// The upstream language model credentials are not available.
    #[error("Model API key not found in environment variable '{env_var}'\n\nSuggestion: Export {env_var} before starting the server")]
    MissingApiKey {
        /// Name of the environment variable that was read.
        env_var: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of lesson generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The service answered with a non-success HTTP status.
    Status(u16),
    /// The request could not be delivered or the connection dropped.
    Network,
    /// The request exceeded the transport timeout.
    Timeout,
    /// The service answered but the body is not a lesson document.
    Malformed,
}

impl std::fmt::Display for GenerationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status {code}"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

impl GenerationErrorKind {
    /// Returns a suggestion message for this failure kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Status(_) => "Check the generation endpoint logs for the failing request",
            Self::Network => "Check that the generation endpoint is running and reachable",
            Self::Timeout => "Retry later or raise requestTimeoutSecs in bloom.json",
            Self::Malformed => "The model returned text that is not a lesson; retrying usually helps",
        }
    }
}

/// Learner input that cannot be accepted.
///
/// Validation never touches the session and never reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ValidationError {
    /// The submitted topic was empty or whitespace.
    #[error("Please enter a topic to learn about")]
    EmptyTopic,
    /// The submitted answer was empty or whitespace.
    #[error("Please write an answer before continuing")]
    EmptyAnswer,
    /// An answer was submitted while no lesson is on screen.
    #[error("Start a topic before answering")]
    NoActiveLesson,
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Generation` error with automatic suggestion based on kind.
    #[must_use]
    pub fn generation(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self::Generation {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `MissingApiKey` error.
    #[must_use]
    pub fn missing_api_key(env_var: impl Into<String>) -> Self {
        Self::MissingApiKey {
            env_var: env_var.into(),
        }
    }

    /// Returns the generation failure kind, if this is a generation error.
    #[must_use]
    pub const fn generation_kind(&self) -> Option<GenerationErrorKind> {
        match self {
            Self::Generation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Generation {
                kind: GenerationErrorKind::Network | GenerationErrorKind::Timeout,
                ..
            }
        ) || matches!(
            self,
            Self::Generation {
                kind: GenerationErrorKind::Status(code),
                ..
            } if *code >= 500 || *code == 429
        )
    }
}
