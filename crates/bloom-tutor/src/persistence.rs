//! Best-effort persistence of sessions and answers.
//!
//! [`PersistenceGateway`] turns every store failure (and a missing identity)
//! into `None` or an empty list, logging it at `warn`. The controller never
//! waits on it directly: saves are queued as [`PersistenceJob`]s and run in
//! order on a background task, so a session is always saved before the answers
//! that reference it.

use std::sync::Arc;

use bloom_store::{
    AnswerRecord, NewAnswer, SessionDraft, SessionRecord, SessionStore, StoredSessionId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::controller::SharedState;
use crate::identity::IdentityProvider;
use crate::session::Session;

// ============================================================================
// Gateway
// ============================================================================

/// Identity-scoped, non-failing access to a [`SessionStore`].
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn SessionStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("user", &self.identity.current_user())
            .finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    /// Creates a gateway writing to `store` on behalf of the current user of `identity`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identity }
    }

    /// Upserts the session record for `session`.
    ///
    /// The stored document number is the one currently on screen
    /// (`document_index + 1`). Returns the stored id, or `None` when nobody is
    /// signed in or the store fails.
    pub async fn save_session(&self, session: &Session) -> Option<StoredSessionId> {
        let Some(user) = self.identity.current_user() else {
            debug!(topic = %session.topic, "No user signed in, session not saved");
            return None;
        };

        let draft = SessionDraft {
            id: session.persisted_id,
            topic: session.topic.clone(),
            current_doc: session.next_document_number(),
            mastery: session.mastery_estimate,
            using_live_generation: session.using_live_generation,
        };

        match self.store.upsert_session(&user, draft).await {
            Ok(record) => {
                debug!(session_id = %record.id, current_doc = record.current_doc, "Session saved");
                Some(record.id)
            }
            Err(e) => {
                warn!(error = %e, topic = %session.topic, "Failed to save session");
                None
            }
        }
    }

    /// Inserts one answer record.
    ///
    /// Returns `None` when nobody is signed in or the store fails.
    pub async fn save_answer(
        &self,
        session_id: StoredSessionId,
        doc_number: u32,
        questions: Vec<String>,
        answer: String,
    ) -> Option<AnswerRecord> {
        if self.identity.current_user().is_none() {
            debug!(%session_id, doc_number, "No user signed in, answer not saved");
            return None;
        }

        let new_answer = NewAnswer {
            session_id,
            doc_number,
            questions,
            answer,
        };
        match self.store.insert_answer(new_answer).await {
            Ok(record) => {
                debug!(%session_id, doc_number, "Answer saved");
                Some(record)
            }
            Err(e) => {
                warn!(error = %e, %session_id, doc_number, "Failed to save answer");
                None
            }
        }
    }

    /// Lists the current user's sessions, most recently updated first.
    pub async fn load_sessions(&self) -> Vec<SessionRecord> {
        let Some(user) = self.identity.current_user() else {
            return Vec::new();
        };
        self.store.sessions_for(&user).await.unwrap_or_else(|e| {
            warn!(error = %e, user = %user, "Failed to load sessions");
            Vec::new()
        })
    }

    /// Lists the answers of one session in document order.
    pub async fn load_answers(&self, session_id: StoredSessionId) -> Vec<AnswerRecord> {
        if self.identity.current_user().is_none() {
            return Vec::new();
        }
        self.store.answers_for(session_id).await.unwrap_or_else(|e| {
            warn!(error = %e, %session_id, "Failed to load answers");
            Vec::new()
        })
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Work queued for the persistence worker.
#[derive(Debug)]
pub(crate) enum PersistenceJob {
    /// Upsert a snapshot of a session.
    SaveSession(Session),
    /// Insert an answer for the session identified by `key`.
    SaveAnswer {
        key: Uuid,
        doc_number: u32,
        questions: Vec<String>,
        answer: String,
    },
    /// Signal once every job queued before this one has finished.
    Flush(oneshot::Sender<()>),
}

/// Stored id of the most recently saved session, by local session key.
///
/// Jobs run in order and a replaced session never queues new jobs, so older
/// entries are never needed again once a newer session has been saved.
#[derive(Debug, Default)]
struct LatestStored(Option<(Uuid, StoredSessionId)>);

impl LatestStored {
    fn get(&self, key: Uuid) -> Option<StoredSessionId> {
        self.0.filter(|(k, _)| *k == key).map(|(_, id)| id)
    }

    fn record(&mut self, key: Uuid, id: StoredSessionId) {
        self.0 = Some((key, id));
    }
}

/// Spawns the task that runs persistence jobs in order.
///
/// The stored id is written back into the controller's session only while
/// that same session is still active.
pub(crate) fn spawn_worker(
    gateway: PersistenceGateway,
    state: SharedState,
    mut jobs: mpsc::UnboundedReceiver<PersistenceJob>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut latest = LatestStored::default();

        while let Some(job) = jobs.recv().await {
            match job {
                PersistenceJob::SaveSession(mut snapshot) => {
                    let key = snapshot.key;
                    if snapshot.persisted_id.is_none() {
                        snapshot.persisted_id = latest.get(key);
                    }
                    let Some(id) = gateway.save_session(&snapshot).await else {
                        continue;
                    };
                    latest.record(key, id);

                    let mut state = state.lock().await;
                    if state.session.key == key && state.session.persisted_id.is_none() {
                        state.session = state.session.clone().with_persisted_id(id);
                    }
                }
                PersistenceJob::SaveAnswer {
                    key,
                    doc_number,
                    questions,
                    answer,
                } => {
                    let Some(session_id) = latest.get(key) else {
                        debug!(doc_number, "Session not stored yet, answer not saved");
                        continue;
                    };
                    gateway
                        .save_answer(session_id, doc_number, questions, answer)
                        .await;
                }
                PersistenceJob::Flush(done) => {
                    done.send(()).ok();
                }
            }
        }

        debug!("Persistence worker stopped");
    })
}
