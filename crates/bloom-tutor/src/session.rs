//! Session state for the adaptive lesson loop.
//!
//! A [`Session`] is a plain value. Each transition consumes the current value
//! and returns the next one, so the controller can swap a fully updated
//! session in under a single lock and nothing ever observes a half-applied
//! change.

use bloom_store::StoredSessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::lesson::{GenerationRequest, LessonDocument};

// ============================================================================
// LoopPhase
// ============================================================================

/// Current phase of the adaptive loop.
///
/// The phase transitions through these states:
/// - `Idle` -> `Generating` (topic submitted, identity present)
/// - `Idle` -> `AwaitingIdentity` (topic submitted, nobody signed in)
/// - `AwaitingIdentity` -> `Generating` (sign-in event consumed)
/// - `Generating` -> `Presenting` (live document or fallback emitted)
/// - `Presenting` -> `Generating` (answer submitted, or new topic)
/// - any -> `Idle` (reset)
///
/// `Idle` is where the loop waits for a topic and `Presenting` is where it
/// waits for an answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// No session; waiting for a topic.
    #[default]
    Idle,
    /// A topic was submitted before anyone signed in.
    AwaitingIdentity,
    /// A generation request is in flight.
    Generating,
    /// A document is on screen; waiting for an answer.
    Presenting,
}

impl LoopPhase {
    /// Returns `true` if a generation request is in flight.
    ///
    /// # Examples
    ///
    /// ```
    /// use bloom_tutor::LoopPhase;
    ///
    /// assert!(LoopPhase::Generating.is_busy());
    /// assert!(!LoopPhase::Presenting.is_busy());
    /// ```
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Generating)
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingIdentity => write!(f, "awaiting_identity"),
            Self::Generating => write!(f, "generating"),
            Self::Presenting => write!(f, "presenting"),
        }
    }
}

// ============================================================================
// GenerationMode
// ============================================================================

/// Whether the document on screen came from the live service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Generated by the live service.
    Live,
    /// Canned fallback content.
    Fallback,
}

impl GenerationMode {
    /// Short badge label shown next to the document.
    #[must_use]
    pub const fn badge(&self) -> &'static str {
        match self {
            Self::Live => "✦ Live generation",
            Self::Fallback => "⚡ Demo mode",
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// A learner's engagement with one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Local identity of this session value, stable across transitions.
    ///
    /// Used to match late persistence results to the session that caused them.
    pub key: Uuid,

    /// Subject being learned; empty only on a blank session.
    pub topic: String,

    /// Number of answers submitted so far; the next document is `document_index + 1`.
    pub document_index: u32,

    /// Latest mastery estimate from the generation service, stored verbatim.
    ///
    /// Kept as-is when a document arrives without an estimate.
    pub mastery_estimate: i32,

    /// Questions of the document currently on screen.
    pub last_questions: Vec<String>,

    /// The learner's most recent answer.
    pub last_answer: String,

    /// `false` when the latest generation attempt fell back to canned content.
    pub using_live_generation: bool,

    /// Identifier of the stored session record, once persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_id: Option<StoredSessionId>,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the session was last changed.
    pub updated_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::blank()
    }
}

impl Session {
    /// Creates the blank session the loop returns to on reset.
    ///
    /// # Examples
    ///
    /// ```
    /// use bloom_tutor::Session;
    ///
    /// let session = Session::blank();
    /// assert!(session.topic.is_empty());
    /// assert_eq!(session.document_index, 0);
    /// assert_eq!(session.mastery_estimate, 0);
    /// assert!(session.last_questions.is_empty());
    /// assert!(session.last_answer.is_empty());
    /// assert!(session.using_live_generation);
    /// assert!(session.persisted_id.is_none());
    /// ```
    #[must_use]
    pub fn blank() -> Self {
        let now = Utc::now();
        Self {
            key: Uuid::new_v4(),
            topic: String::new(),
            document_index: 0,
            mastery_estimate: 0,
            last_questions: Vec::new(),
            last_answer: String::new(),
            using_live_generation: true,
            persisted_id: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Starts a fresh session for `topic`, with every other field at its default.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyTopic` if the trimmed topic is empty.
    pub fn start(topic: &str) -> Result<Self, ValidationError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        Ok(Self {
            topic: topic.to_string(),
            ..Self::blank()
        })
    }

    /// Number of the next document to request, and of the one on screen once it arrives.
    #[must_use]
    pub const fn next_document_number(&self) -> u32 {
        self.document_index + 1
    }

    /// Returns the mode badge for the document on screen.
    #[must_use]
    pub const fn mode(&self) -> GenerationMode {
        if self.using_live_generation {
            GenerationMode::Live
        } else {
            GenerationMode::Fallback
        }
    }

    /// Builds the generation request for the next document.
    ///
    /// Only the most recent answer and the questions it responded to are
    /// forwarded.
    #[must_use]
    pub fn generation_request(&self) -> GenerationRequest {
        if self.document_index == 0 || self.last_answer.is_empty() {
            GenerationRequest {
                doc_number: self.next_document_number(),
                ..GenerationRequest::first(self.topic.clone())
            }
        } else {
            GenerationRequest::follow_up(
                self.topic.clone(),
                self.next_document_number(),
                self.last_questions.clone(),
                vec![self.last_answer.clone()],
            )
        }
    }

    /// Records a submitted answer and advances to the next document number.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyAnswer` if the trimmed answer is empty.
    pub fn with_answer(self, answer: &str) -> Result<Self, ValidationError> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ValidationError::EmptyAnswer);
        }
        Ok(Self {
            last_answer: answer.to_string(),
            document_index: self.document_index + 1,
            updated_at: Utc::now(),
            ..self
        })
    }

    /// Applies a live document: mastery taken verbatim when present, questions replaced.
    #[must_use]
    pub fn with_lesson(self, lesson: &LessonDocument) -> Self {
        Self {
            mastery_estimate: lesson.mastery_estimate.unwrap_or(self.mastery_estimate),
            last_questions: lesson.questions.clone(),
            using_live_generation: true,
            updated_at: Utc::now(),
            ..self
        }
    }

    /// Applies a fallback document: questions replaced, mastery kept.
    #[must_use]
    pub fn with_fallback(self, lesson: &LessonDocument) -> Self {
        Self {
            last_questions: lesson.questions.clone(),
            using_live_generation: false,
            updated_at: Utc::now(),
            ..self
        }
    }

    /// Records the stored record identifier.
    #[must_use]
    pub fn with_persisted_id(self, id: StoredSessionId) -> Self {
        Self {
            persisted_id: Some(id),
            ..self
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
