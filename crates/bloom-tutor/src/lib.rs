//! Bloom adaptive tutor
//!
//! Runs the adaptive lesson loop (topic, lesson, answer, harder or easier
//! lesson) and serves the lesson generation endpoint it talks to.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod generation;
pub mod identity;
pub mod lesson;
pub mod model;
pub mod persistence;
pub mod presentation;
pub mod prompt;
pub mod session;

pub use api::{create_router, AppState, ErrorResponse, GenerateBody};
pub use config::{Config, ModelConfig};
pub use controller::{LoopController, StepOutcome};
pub use error::{GenerationErrorKind, Result, TutorError, ValidationError};
pub use generation::{GenerationClient, HttpGenerationClient};
pub use identity::{IdentityEvent, IdentityProvider, LocalIdentity};
pub use lesson::{DocumentContext, GenerationRequest, LessonDocument, TOPIC_PLACEHOLDER};
pub use model::{GeminiModel, LessonModel};
pub use persistence::PersistenceGateway;
pub use presentation::{clamp_mastery, render_text, LessonView};
pub use session::{GenerationMode, LoopPhase, Session};
