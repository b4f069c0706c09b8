//! In-memory session store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    AnswerRecord, NewAnswer, SessionDraft, SessionRecord, SessionStore, StoreDocument, StoreError,
    StoredSessionId, UserId,
};

/// A [`SessionStore`] that keeps all records in process memory.
///
/// Clones share the same underlying tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreDocument>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreDocument::new())),
        }
    }

    /// Returns the total number of stored answers across all sessions.
    pub async fn answer_count(&self) -> usize {
        self.inner.lock().await.answers.len()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn upsert_session(
        &self,
        user: &UserId,
        draft: SessionDraft,
    ) -> Result<SessionRecord, StoreError> {
        self.inner.lock().await.upsert_session(user, draft)
    }

    async fn insert_answer(&self, answer: NewAnswer) -> Result<AnswerRecord, StoreError> {
        self.inner.lock().await.insert_answer(answer)
    }

    async fn sessions_for(&self, user: &UserId) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.inner.lock().await.sessions_for(user))
    }

    async fn answers_for(
        &self,
        session_id: StoredSessionId,
    ) -> Result<Vec<AnswerRecord>, StoreError> {
        Ok(self.inner.lock().await.answers_for(session_id))
    }
}
