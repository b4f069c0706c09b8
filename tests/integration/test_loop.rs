//! End-to-end tests for the adaptive lesson loop.
//!
//! The controller talks to the real generation endpoint over HTTP, the
//! endpoint talks to a scripted language model, and sessions are persisted to
//! a JSON store in a temporary directory.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bloom_store::{JsonFileStore, SessionStore, UserId};
use bloom_tutor::{
    create_router, AppState, Config, GenerationErrorKind, GenerationMode, HttpGenerationClient,
    LessonModel, LocalIdentity, LoopController, LoopPhase, StepOutcome, TutorError,
    ValidationError, TOPIC_PLACEHOLDER,
};
use futures::future::join_all;

const FIRST_LESSON: &str = r#"{"title":"线性代数入门","content":"<h3>向量</h3><p>有大小和方向的量。</p>","questions":["Q1","Q2","Q3"],"difficultyLevel":3,"masteryEstimate":40}"#;

/// Language model that replays queued replies after an optional delay.
struct ScriptedModel {
    replies: Mutex<VecDeque<bloom_tutor::Result<String>>>,
    calls: Mutex<usize>,
    delay: Duration,
}

impl ScriptedModel {
    fn new(replies: Vec<bloom_tutor::Result<String>>) -> Arc<Self> {
        Self::slow(replies, Duration::ZERO)
    }

    fn slow(replies: Vec<bloom_tutor::Result<String>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

#[async_trait]
impl LessonModel for ScriptedModel {
    async fn complete(&self, _system: &str, _user: &str) -> bloom_tutor::Result<String> {
        *self.calls.lock().expect("calls lock") += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().expect("replies lock").pop_front();
        next.unwrap_or_else(|| {
            Err(TutorError::generation(
                GenerationErrorKind::Network,
                "no scripted reply",
            ))
        })
    }
}

fn unavailable() -> bloom_tutor::Result<String> {
    Err(TutorError::generation(
        GenerationErrorKind::Status(503),
        "language model returned 503",
    ))
}

/// Spawns the endpoint and returns its generate URL.
async fn spawn_endpoint(model: Arc<ScriptedModel>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = create_router(AppState::new(Config::default(), model));

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    format!("http://{addr}/api/generate")
}

fn temp_store_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("bloom-it-{}-{name}", std::process::id()))
        .join("store.json")
}

struct Learner {
    controller: LoopController,
    identity: LocalIdentity,
    store: JsonFileStore,
    store_path: PathBuf,
}

async fn learner(url: String, identity: LocalIdentity, name: &str) -> Learner {
    let store_path = temp_store_path(name);
    std::fs::remove_dir_all(store_path.parent().expect("store dir")).ok();
    let store = JsonFileStore::open(&store_path)
        .await
        .expect("Failed to open store");
    let client =
        HttpGenerationClient::new(url, Duration::from_secs(5)).expect("Failed to build client");
    let controller = LoopController::new(
        Arc::new(client),
        Arc::new(identity.clone()),
        Arc::new(store.clone()),
    );
    Learner {
        controller,
        identity,
        store,
        store_path,
    }
}

impl Drop for Learner {
    fn drop(&mut self) {
        if let Some(dir) = self.store_path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

/// A live first lesson, an answer, then an upstream failure that falls back.
#[tokio::test]
async fn test_linear_algebra_session() {
    let url = spawn_endpoint(ScriptedModel::new(vec![
        Ok(FIRST_LESSON.to_string()),
        unavailable(),
    ]))
    .await;
    let user = UserId::new("learner-1");
    let l = learner(url, LocalIdentity::signed_in_as(user.clone()), "scenario").await;

    let first = l.controller.submit_topic("线性代数").await;
    let view = first.view().expect("first lesson presented");
    assert_eq!(view.document_number, 1);
    assert_eq!(view.mastery_percent, 40);
    assert_eq!(view.mode, GenerationMode::Live);

    let session = l.controller.session().await;
    assert_eq!(session.document_index, 0);
    assert_eq!(session.last_questions, vec!["Q1", "Q2", "Q3"]);

    let second = l.controller.submit_answer("我不太懂").await;
    let view = second.view().expect("fallback lesson presented");
    assert_eq!(view.document_number, 2);
    assert_eq!(view.mode, GenerationMode::Fallback);
    assert_eq!(view.questions.len(), 3);
    assert_eq!(view.difficulty_level, 1);
    assert!(view.title.contains("线性代数"));
    assert!(view.questions.iter().all(|q| q.contains("线性代数")));
    assert!(!view.content.contains(TOPIC_PLACEHOLDER));

    let session = l.controller.session().await;
    assert_eq!(session.document_index, 1);
    assert_eq!(session.last_answer, "我不太懂");
    assert!(!session.using_live_generation);

    l.controller.flush_persistence().await;
    let stored_id = l
        .controller
        .session()
        .await
        .persisted_id
        .expect("session persisted");

    // Reopen from disk to check what actually landed in the file.
    let reopened = JsonFileStore::open(&l.store_path)
        .await
        .expect("Failed to reopen store");
    let sessions = reopened.sessions_for(&user).await.expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, stored_id);
    assert_eq!(sessions[0].topic, "线性代数");
    assert_eq!(sessions[0].current_doc, 1);
    assert_eq!(sessions[0].mastery, 40);

    let answers = reopened.answers_for(stored_id).await.expect("answers");
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].doc_number, 1);
    assert_eq!(answers[0].answer, "我不太懂");
    assert_eq!(answers[0].questions, vec!["Q1", "Q2", "Q3"]);
}

/// An unreachable endpoint falls back without persisting anything.
#[tokio::test]
async fn test_unreachable_endpoint_falls_back() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);

    let l = learner(
        format!("http://{addr}/api/generate"),
        LocalIdentity::signed_in_as(UserId::new("learner-1")),
        "unreachable",
    )
    .await;

    let outcome = l.controller.submit_topic("rust").await;

    let view = outcome.view().expect("fallback presented");
    assert_eq!(view.mode, GenerationMode::Fallback);
    assert_eq!(view.document_number, 1);
    assert_eq!(view.mastery_percent, 0);

    l.controller.flush_persistence().await;
    let sessions = l
        .store
        .sessions_for(&UserId::new("learner-1"))
        .await
        .expect("sessions");
    assert!(sessions.is_empty());
}

/// Validation never reaches the endpoint.
#[tokio::test]
async fn test_blank_input_is_rejected_locally() {
    let model = ScriptedModel::new(vec![Ok(FIRST_LESSON.to_string())]);
    let url = spawn_endpoint(Arc::clone(&model)).await;
    let l = learner(url, LocalIdentity::signed_in_as(UserId::new("u")), "blank").await;

    assert_eq!(
        l.controller.submit_topic("  ").await,
        StepOutcome::Rejected(ValidationError::EmptyTopic)
    );
    l.controller.submit_topic("rust").await;
    assert_eq!(
        l.controller.submit_answer("").await,
        StepOutcome::Rejected(ValidationError::EmptyAnswer)
    );

    assert_eq!(model.calls(), 1);
    assert_eq!(l.controller.session().await.document_index, 0);
}

/// Concurrent submits while a lesson is generating issue one request only.
#[tokio::test]
async fn test_concurrent_submits_issue_one_request() {
    let model = ScriptedModel::slow(
        vec![Ok(FIRST_LESSON.to_string())],
        Duration::from_millis(200),
    );
    let url = spawn_endpoint(Arc::clone(&model)).await;
    let l = learner(url, LocalIdentity::signed_in_as(UserId::new("u")), "concurrent").await;

    let submits = (0..5).map(|i| {
        let controller = l.controller.clone();
        async move { controller.submit_topic(&format!("topic {i}")).await }
    });
    let outcomes = join_all(submits).await;

    let presented = outcomes.iter().filter(|o| o.view().is_some()).count();
    let ignored = outcomes
        .iter()
        .filter(|o| **o == StepOutcome::Ignored)
        .count();
    assert_eq!(presented, 1);
    assert_eq!(ignored, 4);
    assert_eq!(model.calls(), 1);
    assert_eq!(l.controller.phase().await, LoopPhase::Presenting);
}

/// A topic submitted before sign-in starts once the learner signs in.
#[tokio::test]
async fn test_sign_in_resumes_pending_topic() {
    let model = ScriptedModel::new(vec![Ok(FIRST_LESSON.to_string())]);
    let url = spawn_endpoint(Arc::clone(&model)).await;
    let l = learner(url, LocalIdentity::new(), "sign-in").await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(4);
    let watcher = l.controller.watch_identity(tx);

    assert_eq!(
        l.controller.submit_topic("线性代数").await,
        StepOutcome::AwaitingIdentity
    );
    assert_eq!(model.calls(), 0);

    l.identity.sign_in(UserId::new("learner-2"));
    let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timeout waiting for resumed start")
        .expect("Watcher stopped");

    let view = outcome.view().expect("lesson presented");
    assert_eq!(view.topic, "线性代数");
    assert_eq!(model.calls(), 1);

    // A second sign-in does not start the session again.
    l.identity.sign_in(UserId::new("learner-2"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(model.calls(), 1);

    l.controller.flush_persistence().await;
    let sessions = l
        .store
        .sessions_for(&UserId::new("learner-2"))
        .await
        .expect("sessions");
    assert_eq!(sessions.len(), 1);

    watcher.abort();
}

/// Reset returns everything to defaults.
#[tokio::test]
async fn test_reset_after_lesson() {
    let url = spawn_endpoint(ScriptedModel::new(vec![Ok(FIRST_LESSON.to_string())])).await;
    let l = learner(url, LocalIdentity::signed_in_as(UserId::new("u")), "reset").await;

    l.controller.submit_topic("rust").await;
    l.controller.reset().await;

    let session = l.controller.session().await;
    assert!(session.topic.is_empty());
    assert_eq!(session.document_index, 0);
    assert_eq!(session.mastery_estimate, 0);
    assert!(session.last_questions.is_empty());
    assert!(session.last_answer.is_empty());
    assert!(session.using_live_generation);
    assert_eq!(l.controller.phase().await, LoopPhase::Idle);
}
