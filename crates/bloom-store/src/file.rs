//! JSON-file-backed session store.
//!
//! The whole store is one JSON document. Every mutation is applied to a copy,
//! written to a temporary sibling file and renamed over the original, then
//! committed to memory. A failed write leaves both the file and the in-memory
//! tables untouched.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    AnswerRecord, NewAnswer, SessionDraft, SessionRecord, SessionStore, StoreDocument, StoreError,
    StoredSessionId, UserId, STORE_VERSION,
};

/// A [`SessionStore`] persisted to a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Arc<Mutex<StoreDocument>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read and
    /// `StoreError::Corrupted` if it is not a valid store document.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let document: StoreDocument =
                    serde_json::from_str(&contents).map_err(|e| StoreError::Corrupted {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
                if document.version > STORE_VERSION {
                    return Err(StoreError::Corrupted {
                        path,
                        message: format!(
                            "unsupported store version {} (expected at most {STORE_VERSION})",
                            document.version
                        ),
                    });
                }
                info!(
                    path = %path.display(),
                    sessions = document.sessions.len(),
                    answers = document.answers.len(),
                    "Opened session store"
                );
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Store file missing, starting empty");
                StoreDocument::new()
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path,
                    message: e.to_string(),
                })
            }
        };

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(document)),
        })
    }

    async fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let io_err = |e: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            message: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }

        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn upsert_session(
        &self,
        user: &UserId,
        draft: SessionDraft,
    ) -> Result<SessionRecord, StoreError> {
        let mut guard = self.inner.lock().await;
        let mut next = guard.clone();
        let record = next.upsert_session(user, draft)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(record)
    }

    async fn insert_answer(&self, answer: NewAnswer) -> Result<AnswerRecord, StoreError> {
        let mut guard = self.inner.lock().await;
        let mut next = guard.clone();
        let record = next.insert_answer(answer)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(record)
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
