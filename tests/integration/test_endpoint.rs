//! Integration tests for the lesson generation endpoint.
//!
//! These tests run the real router on an ephemeral port with a scripted
//! language model and talk to it over HTTP.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bloom_tutor::{
    create_router, AppState, Config, GenerationErrorKind, LessonDocument, LessonModel, TutorError,
};
use reqwest::StatusCode;
use serde_json::{json, Value};

const LESSON_JSON: &str = r#"{"title":"什么是向量","content":"<h3>向量</h3><p>有大小和方向的量。</p>","questions":["Q1","Q2","Q3"],"difficultyLevel":3,"masteryEstimate":40}"#;

/// Language model that replays queued replies and records user prompts.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<bloom_tutor::Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<bloom_tutor::Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl LessonModel for ScriptedModel {
    async fn complete(&self, _system: &str, user: &str) -> bloom_tutor::Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(user.to_string());
        let next = self.replies.lock().expect("replies lock").pop_front();
        next.unwrap_or_else(|| {
            Err(TutorError::generation(
                GenerationErrorKind::Network,
                "no scripted reply",
            ))
        })
    }
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

async fn post(url: &str, body: Value) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("Request failed");
    let status = response.status();
    let body = response.json().await.expect("Response is not JSON");
    (status, body)
}

// ============================================================================
// Success
// ============================================================================

#[tokio::test]
async fn test_generate_returns_lesson() {
    let model = ScriptedModel::new(vec![Ok(LESSON_JSON.to_string())]);
    let url = spawn_endpoint(Arc::clone(&model)).await;

    let (status, body) = post(
        &url,
        json!({"topic": "线性代数", "docNumber": 1, "previousAnswers": null, "previousQuestions": null}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let doc: LessonDocument = serde_json::from_value(body).expect("Not a lesson document");
    assert_eq!(doc.title, "什么是向量");
    assert_eq!(doc.questions, vec!["Q1", "Q2", "Q3"]);
    assert_eq!(doc.difficulty_level, 3);
    assert_eq!(doc.mastery_estimate, Some(40));

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Topic: 线性代数"));
}

#[tokio::test]
async fn test_generate_strips_fence_and_salvages_prose() {
    let model = ScriptedModel::new(vec![
        Ok(format!("```json\n{LESSON_JSON}\n```")),
        Ok("Vectors are arrows.\nThey add tip to tail.".to_string()),
    ]);
    let url = spawn_endpoint(model).await;

    let (status, fenced) = post(&url, json!({"topic": "线性代数"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fenced["title"], "什么是向量");

    let (status, salvaged) = post(&url, json!({"topic": "线性代数", "docNumber": 2})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(salvaged["title"], "线性代数 - Lesson #2");
    assert_eq!(
        salvaged["content"],
        "<p>Vectors are arrows.</p><p>They add tip to tail.</p>"
    );
    assert_eq!(salvaged["questions"].as_array().map(Vec::len), Some(3));
    assert_eq!(salvaged["difficultyLevel"], 2);
    assert_eq!(salvaged["masteryEstimate"], 0);
}

#[tokio::test]
async fn test_follow_up_forwards_answers() {
    let model = ScriptedModel::new(vec![Ok(LESSON_JSON.to_string())]);
    let url = spawn_endpoint(Arc::clone(&model)).await;

    let (status, _) = post(
        &url,
        json!({
            "topic": "线性代数",
            "docNumber": 2,
            "previousAnswers": ["我不太懂"],
            "previousQuestions": ["什么是向量？", "向量如何相加？"]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let prompt = &model.prompts()[0];
    assert!(prompt.contains("lesson document #2"));
    assert!(prompt.contains("Question 1: 什么是向量？\nAnswer 1: 我不太懂"));
    assert!(prompt.contains("Question 2: 向量如何相加？\nAnswer 2: (no answer)"));
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_missing_topic_returns_400() {
    let model = ScriptedModel::new(Vec::new());
    let url = spawn_endpoint(Arc::clone(&model)).await;

    let (status, body) = post(&url, json!({"docNumber": 1})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Topic is required");
    assert!(model.prompts().is_empty());
}

#[tokio::test]
async fn test_upstream_failure_returns_502() {
    let model = ScriptedModel::new(vec![Err(TutorError::generation(
        GenerationErrorKind::Status(503),
        "language model returned 503",
    ))]);
    let url = spawn_endpoint(model).await;

    let (status, body) = post(&url, json!({"topic": "rust"})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "AI service error", "details": "Status 503"}));
}

#[tokio::test]
async fn test_missing_credentials_returns_500() {
    let model = ScriptedModel::new(vec![Err(TutorError::missing_api_key("BLOOM_MODEL_API_KEY"))]);
    let url = spawn_endpoint(model).await;

    let (status, body) = post(&url, json!({"topic": "rust"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_other_methods_return_405() {
    let url = spawn_endpoint(ScriptedModel::new(Vec::new())).await;

    let response = reqwest::Client::new()
        .put(&url)
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_cors_preflight() {
    let url = spawn_endpoint(ScriptedModel::new(Vec::new())).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, &url)
        .header("Origin", "https://bloom.example")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    let allow_headers = headers
        .get("access-control-allow-headers")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    assert!(allow_headers.contains("content-type"));
}
