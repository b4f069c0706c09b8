//! Adaptive loop controller.
//!
//! [`LoopController`] owns the learner's [`Session`] and sequences topic
//! submission, lesson generation, answer capture and reset. Learner-facing
//! results come back as a [`StepOutcome`]; nothing from the generation service
//! or the store ever reaches the caller as an error.
//!
//! The state lock is never held across the generation call. While a request is
//! in flight the phase is [`LoopPhase::Generating`], and any topic or answer
//! submitted in that window is ignored rather than issuing a second request.

use std::sync::Arc;

use bloom_store::SessionStore;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::generation::GenerationClient;
use crate::identity::{IdentityEvent, IdentityProvider};
use crate::lesson::{GenerationRequest, LessonDocument};
use crate::persistence::{self, PersistenceGateway, PersistenceJob};
use crate::presentation::LessonView;
use crate::session::{LoopPhase, Session};

/// Controller state shared with the persistence worker.
#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub(crate) phase: LoopPhase,
    pub(crate) session: Session,
    pending_topic: Option<String>,
    current_view: Option<LessonView>,
}

pub(crate) type SharedState = Arc<Mutex<ControllerState>>;

/// Result of one learner action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "snake_case")]
pub enum StepOutcome {
    /// A document (live or fallback) is now on screen.
    Presented(LessonView),
    /// The input was rejected; the session is unchanged.
    Rejected(ValidationError),
    /// The topic is held until someone signs in.
    AwaitingIdentity,
    /// The action was dropped because a generation request is in flight,
    /// or its result belonged to a session that is no longer active.
    Ignored,
}

impl StepOutcome {
    /// Returns the presented view, if any.
    #[must_use]
    pub const fn view(&self) -> Option<&LessonView> {
        match self {
            Self::Presented(view) => Some(view),
            _ => None,
        }
    }
}

/// Drives one learner's adaptive lesson loop.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct LoopController {
    client: Arc<dyn GenerationClient>,
    identity: Arc<dyn IdentityProvider>,
    jobs: mpsc::UnboundedSender<PersistenceJob>,
    state: SharedState,
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController").finish_non_exhaustive()
    }
}

impl LoopController {
    /// Creates a controller and spawns its persistence worker.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        client: Arc<dyn GenerationClient>,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::default()));
        let (jobs, receiver) = mpsc::unbounded_channel();
        let gateway = PersistenceGateway::new(store, Arc::clone(&identity));
        persistence::spawn_worker(gateway, Arc::clone(&state), receiver);

        Self {
            client,
            identity,
            jobs,
            state,
        }
    }

    /// Returns a snapshot of the current session.
    pub async fn session(&self) -> Session {
        self.state.lock().await.session.clone()
    }

    /// Returns the current phase.
    pub async fn phase(&self) -> LoopPhase {
        self.state.lock().await.phase
    }

    /// Returns the document currently on screen, if any.
    pub async fn current_view(&self) -> Option<LessonView> {
        self.state.lock().await.current_view.clone()
    }

    // ========================================================================
    // Learner actions
    // ========================================================================

    /// Starts a new session for `topic` and generates its first document.
    ///
    /// A blank topic is rejected without touching the session. Without a
    /// signed-in user the topic is held as a pending start, resumed by the
    /// next sign-in event.
    pub async fn submit_topic(&self, topic: &str) -> StepOutcome {
        let session = match Session::start(topic) {
            Ok(session) => session,
            Err(e) => return StepOutcome::Rejected(e),
        };

        let mut state = self.state.lock().await;
        if state.phase.is_busy() {
            debug!(topic = %session.topic, "Generation in flight, topic ignored");
            return StepOutcome::Ignored;
        }

        if self.identity.current_user().is_none() {
            info!(topic = %session.topic, "No user signed in, holding topic until sign-in");
            state.pending_topic = Some(session.topic);
            state.phase = LoopPhase::AwaitingIdentity;
            return StepOutcome::AwaitingIdentity;
        }

        self.begin(state, session).await
    }

    /// Records an answer to the document on screen and generates the next one.
    pub async fn submit_answer(&self, answer: &str) -> StepOutcome {
        let mut state = self.state.lock().await;
        match state.phase {
            LoopPhase::Generating => {
                debug!("Generation in flight, answer ignored");
                return StepOutcome::Ignored;
            }
            LoopPhase::Presenting => {}
            LoopPhase::Idle | LoopPhase::AwaitingIdentity => {
                return StepOutcome::Rejected(ValidationError::NoActiveLesson);
            }
        }

        let session = match state.session.clone().with_answer(answer) {
            Ok(session) => session,
            Err(e) => return StepOutcome::Rejected(e),
        };

        info!(
            topic = %session.topic,
            doc_number = session.document_index,
            "Answer submitted"
        );
        self.enqueue(PersistenceJob::SaveAnswer {
            key: session.key,
            doc_number: session.document_index,
            questions: session.last_questions.clone(),
            answer: session.last_answer.clone(),
        });

        state.session = session;
        state.phase = LoopPhase::Generating;
        let request = state.session.generation_request();
        let key = state.session.key;
        drop(state);

        self.generate(key, request).await
    }

    /// Clears the session and returns to `Idle`.
    ///
    /// A generation request already in flight is not cancelled; its result is
    /// discarded when it arrives.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = ControllerState::default();
        info!("Session reset");
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Reacts to an identity change.
    ///
    /// A sign-in resumes a pending start exactly once. Returns the outcome of
    /// the resumed start, or `None` if there was nothing to resume.
    pub async fn handle_identity_event(&self, event: IdentityEvent) -> Option<StepOutcome> {
        match event {
            IdentityEvent::SignedIn(user) => {
                let mut state = self.state.lock().await;
                let topic = state.pending_topic.take()?;
                if state.phase != LoopPhase::AwaitingIdentity {
                    return None;
                }
                info!(user = %user, topic = %topic, "Resuming pending session start");
                let session = match Session::start(&topic) {
                    Ok(session) => session,
                    Err(e) => return Some(StepOutcome::Rejected(e)),
                };
                Some(self.begin(state, session).await)
            }
            IdentityEvent::SignedOut => {
                debug!("User signed out");
                None
            }
        }
    }

    /// Spawns a task that feeds identity events into
    /// [`handle_identity_event`](Self::handle_identity_event) and forwards
    /// resulting outcomes to `outcomes`.
    ///
    /// If the watcher falls behind and events are lost, the current user is
    /// checked instead, so a dropped sign-in still resumes the pending start.
    ///
    /// The task ends when the identity provider closes or `outcomes` is dropped.
    pub fn watch_identity(&self, outcomes: mpsc::Sender<StepOutcome>) -> JoinHandle<()> {
        let mut events = self.identity.subscribe();
        let controller = self.clone();

        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Identity watcher fell behind, checking current user");
                        match controller.identity.current_user() {
                            Some(user) => IdentityEvent::SignedIn(user),
                            None => continue,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(outcome) = controller.handle_identity_event(event).await else {
                    continue;
                };
                if outcomes.send(outcome).await.is_err() {
                    break;
                }
            }
            debug!("Identity watcher stopped");
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Waits until every persistence job queued so far has finished.
    pub async fn flush_persistence(&self) {
        let (done, wait) = oneshot::channel();
        if self.jobs.send(PersistenceJob::Flush(done)).is_ok() {
            wait.await.ok();
        }
    }

    fn enqueue(&self, job: PersistenceJob) {
        if self.jobs.send(job).is_err() {
            warn!("Persistence worker is not running, job dropped");
        }
    }

    // ========================================================================
    // Generation
    // ========================================================================

    async fn begin(
        &self,
        mut state: MutexGuard<'_, ControllerState>,
        session: Session,
    ) -> StepOutcome {
        info!(topic = %session.topic, "Session started");
        state.session = session;
        state.phase = LoopPhase::Generating;
        state.pending_topic = None;
        state.current_view = None;
        let request = state.session.generation_request();
        let key = state.session.key;
        drop(state);

        self.generate(key, request).await
    }

    async fn generate(&self, key: Uuid, request: GenerationRequest) -> StepOutcome {
        let result = self.client.generate(&request).await;

        let mut state = self.state.lock().await;
        if state.session.key != key || state.phase != LoopPhase::Generating {
            debug!(
                topic = %request.topic,
                doc_number = request.doc_number,
                "Session changed during generation, result discarded"
            );
            return StepOutcome::Ignored;
        }

        let (session, lesson, live) = match result {
            Ok(lesson) => {
                info!(
                    topic = %request.topic,
                    doc_number = request.doc_number,
                    difficulty = lesson.difficulty_level,
                    mastery = ?lesson.mastery_estimate,
                    "Lesson generated"
                );
                (state.session.clone().with_lesson(&lesson), lesson, true)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    topic = %request.topic,
                    doc_number = request.doc_number,
                    "Lesson generation failed, using fallback content"
                );
                let fallback = LessonDocument::fallback(&request.topic);
                (state.session.clone().with_fallback(&fallback), fallback, false)
            }
        };

        let view = LessonView::new(&session, &lesson);
        state.session = session;
        state.phase = LoopPhase::Presenting;
        state.current_view = Some(view.clone());
        if live {
            self.enqueue(PersistenceJob::SaveSession(state.session.clone()));
        }

        StepOutcome::Presented(view)
    }
}
