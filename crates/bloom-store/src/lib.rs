//! Bloom Session Storage
//!
//! Record types and backing stores for learning sessions and submitted answers.
//!
//! Two record kinds are kept:
//! - session records, one per learning session, upserted by identifier
//! - answer records, one per submitted answer, insert-only
//!
//! Stores implement [`SessionStore`]. [`InMemoryStore`] is used by tests and
//! short-lived processes; [`JsonFileStore`] keeps everything in a single JSON
//! document on disk.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

/// Version of the on-disk store document.
pub const STORE_VERSION: u32 = 1;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(StoredSessionId),

    /// The session exists but belongs to another user.
    #[error("session {0} belongs to a different user")]
    Conflict(StoredSessionId),

    /// Failed to read or write the store file.
    #[error("store I/O error at '{path}': {message}")]
    Io {
        /// Path of the store file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The store file exists but cannot be decoded.
    #[error("corrupted store file '{path}': {message}")]
    Corrupted {
        /// Path of the store file.
        path: PathBuf,
        /// Description of the decode failure.
        message: String,
    },

    /// Serialization failed while writing the store.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable identifier of an authenticated user, issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from the provider's opaque id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a stored session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredSessionId(Uuid);

impl StoredSessionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StoredSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A stored learning session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Record identifier.
    pub id: StoredSessionId,
    /// Owner of the session.
    pub user_id: UserId,
    /// Subject being learned.
    pub topic: String,
    /// Number of the document currently shown (1-indexed).
    pub current_doc: u32,
    /// Latest mastery estimate reported by the generation service.
    pub mastery: i32,
    /// Whether the latest document came from live generation.
    pub using_live_generation: bool,
    /// When the record was first stored.
    pub created_at: DateTime<Utc>,
    /// When the record was last upserted.
    pub updated_at: DateTime<Utc>,
}

/// Values written by a session upsert.
///
/// When `id` is `None` a new record is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDraft {
    /// Existing record to update, if any.
    pub id: Option<StoredSessionId>,
    /// Subject being learned.
    pub topic: String,
    /// Number of the document currently shown.
    pub current_doc: u32,
    /// Latest mastery estimate.
    pub mastery: i32,
    /// Whether the latest document came from live generation.
    pub using_live_generation: bool,
}

/// A stored answer to one document's diagnostic questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Session this answer belongs to.
    pub session_id: StoredSessionId,
    /// Number of the document the answer responds to.
    pub doc_number: u32,
    /// The questions that were on screen.
    pub questions: Vec<String>,
    /// The learner's free-text answer.
    pub answer: String,
    /// When the answer was stored.
    pub created_at: DateTime<Utc>,
}

/// Values written by an answer insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswer {
    /// Session this answer belongs to.
    pub session_id: StoredSessionId,
    /// Number of the document the answer responds to.
    pub doc_number: u32,
    /// The questions that were on screen.
    pub questions: Vec<String>,
    /// The learner's free-text answer.
    pub answer: String,
}

/// Backing store for sessions and answers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or updates a session owned by `user`.
    ///
    /// `created_at` is preserved on update.
    async fn upsert_session(
        &self,
        user: &UserId,
        draft: SessionDraft,
    ) -> Result<SessionRecord, StoreError>;

    /// Appends an answer record. Existing answers are never modified.
    async fn insert_answer(&self, answer: NewAnswer) -> Result<AnswerRecord, StoreError>;

    /// Lists a user's sessions, most recently updated first.
    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionRecord>, StoreError>;

    /// Lists a session's answers ordered by document number.
    async fn answers_for(
        &self,
        session_id: StoredSessionId,
    ) -> Result<Vec<AnswerRecord>, StoreError>;
}

/// The full contents of a store: both record tables.
///
/// Shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub answers: Vec<AnswerRecord>,
}

const fn default_version() -> u32 {
    STORE_VERSION
}

impl StoreDocument {
    pub(crate) fn new() -> Self {
        Self {
            version: STORE_VERSION,
            sessions: Vec::new(),
            answers: Vec::new(),
        }
    }

    pub(crate) fn upsert_session(
        &mut self,
        user: &UserId,
        draft: SessionDraft,
    ) -> Result<SessionRecord, StoreError> {
        let now = Utc::now();
        let id = draft.id.unwrap_or_else(StoredSessionId::generate);

        if let Some(existing) = self.sessions.iter_mut().find(|s| s.id == id) {
            if existing.user_id != *user {
                return Err(StoreError::Conflict(id));
            }
            existing.topic = draft.topic;
            existing.current_doc = draft.current_doc;
            existing.mastery = draft.mastery;
            existing.using_live_generation = draft.using_live_generation;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let record = SessionRecord {
            id,
            user_id: user.clone(),
            topic: draft.topic,
            current_doc: draft.current_doc,
            mastery: draft.mastery,
            using_live_generation: draft.using_live_generation,
            created_at: now,
            updated_at: now,
        };
        self.sessions.push(record.clone());
        Ok(record)
    }

    pub(crate) fn insert_answer(&mut self, answer: NewAnswer) -> Result<AnswerRecord, StoreError> {
        if !self.sessions.iter().any(|s| s.id == answer.session_id) {
            return Err(StoreError::SessionNotFound(answer.session_id));
        }

        let record = AnswerRecord {
            id: Uuid::new_v4(),
            session_id: answer.session_id,
            doc_number: answer.doc_number,
            questions: answer.questions,
            answer: answer.answer,
            created_at: Utc::now(),
        };
        self.answers.push(record.clone());
        Ok(record)
    }

    pub(crate) fn sessions_for(&self, user: &UserId) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == *user)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions
    }

    pub(crate) fn answers_for(&self, session_id: StoredSessionId) -> Vec<AnswerRecord> {
        let mut answers: Vec<AnswerRecord> = self
            .answers
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for answers to the same document.
        answers.sort_by_key(|a| a.doc_number);
        answers
    }
}
