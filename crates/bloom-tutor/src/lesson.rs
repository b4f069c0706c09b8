//! Lesson generation contract.
//!
//! Request and response shapes exchanged with the lesson generation service,
//! parsing of the service's raw output, and the canned fallback lesson used
//! whenever live generation is unavailable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GenerationErrorKind, Result, TutorError};

/// Token replaced by the topic in every field of the fallback lesson.
pub const TOPIC_PLACEHOLDER: &str = "topic_placeholder";

/// Questions used by the fallback lesson and by salvaged model output:
/// self-summary, confusion point, worked example.
pub const FALLBACK_QUESTIONS: [&str; 3] = [
    "Can you summarize the core idea of topic_placeholder in your own words?",
    "Which part of topic_placeholder still feels unclear or confusing to you?",
    "Can you give a concrete example where topic_placeholder applies?",
];

const FALLBACK_TITLE: &str = "Getting started with topic_placeholder";

const FALLBACK_CONTENT: &str = r"<h3>What is topic_placeholder?</h3>
<p>Let's begin with the foundations. This first lesson builds a <strong>basic mental map</strong> of topic_placeholder that later lessons will refine.</p>
<h3>Core ideas</h3>
<p>Every field rests on a few <strong>first principles</strong>: concepts that cannot be broken down further. Learning topic_placeholder starts with finding those building blocks and then layering richer understanding on top of them.</p>
<p>Adaptive lessons help because they:</p>
<ul>
<li>adjust difficulty to your answers</li>
<li>skip what you already know</li>
<li>slow down where you are still unsure</li>
<li>keep you working at the edge of what you can do</li>
</ul>
<h3>How to proceed</h3>
<blockquote>Mastery learning means reaching <strong>80-90% understanding</strong> of the current material before moving on.</blockquote>
<p>Answer the questions below carefully. Your answers decide the difficulty and direction of the next lesson.</p>";

/// Matches an opening code fence, optionally tagged `json`.
static LEADING_FENCE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^\s*```(?:json)?\s*").ok());

/// Matches a closing code fence.
static TRAILING_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\s*```\s*$").ok());

// ============================================================================
// Request
// ============================================================================

/// What the service knows about the learner when generating a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContext {
    /// The first document of a session; nothing is known yet.
    First,
    /// A later document, informed by the previous round.
    FollowUp {
        /// Questions shown with the previous document.
        previous_questions: Vec<String>,
        /// The learner's answers to them.
        previous_answers: Vec<String>,
    },
}

/// Body of a generation request.
///
/// `previous_answers` and `previous_questions` are `null` on the wire exactly
/// when `doc_number == 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Subject being learned.
    pub topic: String,
    /// Number of the document to generate (1-indexed).
    pub doc_number: u32,
    /// Answers from the previous round.
    #[serde(default)]
    pub previous_answers: Option<Vec<String>>,
    /// Questions from the previous round.
    #[serde(default)]
    pub previous_questions: Option<Vec<String>>,
}

impl GenerationRequest {
    /// Builds the request for the first document of a session.
    #[must_use]
    pub fn first(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            doc_number: 1,
            previous_answers: None,
            previous_questions: None,
        }
    }

    /// Builds a request for document `doc_number` (> 1) carrying the previous round.
    #[must_use]
    pub fn follow_up(
        topic: impl Into<String>,
        doc_number: u32,
        previous_questions: Vec<String>,
        previous_answers: Vec<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            doc_number,
            previous_answers: Some(previous_answers),
            previous_questions: Some(previous_questions),
        }
    }

    /// Returns the learner context carried by this request.
    ///
    /// A request for document 1, or one without previous answers, is a first
    /// document.
    #[must_use]
    pub fn context(&self) -> DocumentContext {
        match (&self.previous_answers, self.doc_number) {
            (Some(answers), n) if n > 1 => DocumentContext::FollowUp {
                previous_questions: self.previous_questions.clone().unwrap_or_default(),
                previous_answers: answers.clone(),
            },
            _ => DocumentContext::First,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// One generated lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDocument {
    /// Short title.
    pub title: String,
    /// Rich-text body (headings, paragraphs, emphasis, lists, quotes).
    ///
    /// Treated as an opaque renderable payload.
    pub content: String,
    /// Open-ended diagnostic questions, at least one.
    pub questions: Vec<String>,
    /// Difficulty chosen by the service, nominally 1-10.
    pub difficulty_level: i32,
    /// The service's estimate of learner understanding, nominally 0-100.
    ///
    /// `None` when the service gave no estimate; the session then keeps its
    /// previous value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastery_estimate: Option<i32>,
}

/// Lesson as the service writes it: numbers may be fractional or missing.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLesson {
    title: String,
    content: String,
    questions: Vec<String>,
    #[serde(default)]
    difficulty_level: Option<f64>,
    #[serde(default)]
    mastery_estimate: Option<f64>,
}

impl LessonDocument {
    /// Parses raw service output into a lesson document for `doc_number`.
    ///
    /// A leading and trailing code fence (optionally tagged `json`) is
    /// stripped before parsing. Fractional numbers are rounded. A missing
    /// difficulty defaults to the document number clamped to 1-10, a missing
    /// mastery estimate stays `None`. A document without questions is
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns a `Malformed` generation error if the text is not a lesson.
    pub fn parse(raw: &str, doc_number: u32) -> Result<Self> {
        let cleaned = strip_code_fence(raw);
        let lesson: RawLesson = serde_json::from_str(cleaned).map_err(|e| {
            TutorError::generation(
                GenerationErrorKind::Malformed,
                format!("response is not a lesson document: {e}"),
            )
        })?;

        if lesson.questions.is_empty() {
            return Err(TutorError::generation(
                GenerationErrorKind::Malformed,
                "lesson document has no diagnostic questions",
            ));
        }

        Ok(Self {
            title: lesson.title,
            content: lesson.content,
            questions: lesson.questions,
            difficulty_level: lesson
                .difficulty_level
                .map_or_else(|| default_difficulty(doc_number), round_to_i32),
            mastery_estimate: lesson.mastery_estimate.map(round_to_i32),
        })
    }

    /// Builds the canned fallback lesson for `topic`.
    ///
    /// Every occurrence of [`TOPIC_PLACEHOLDER`] in the title, content and
    /// questions is replaced by the topic.
    #[must_use]
    pub fn fallback(topic: &str) -> Self {
        let substitute = |text: &str| text.replace(TOPIC_PLACEHOLDER, topic);
        Self {
            title: substitute(FALLBACK_TITLE),
            content: substitute(FALLBACK_CONTENT),
            questions: FALLBACK_QUESTIONS.iter().map(|q| substitute(q)).collect(),
            difficulty_level: 1,
            mastery_estimate: Some(0),
        }
    }
}

/// Difficulty used when the service gives none: the document number, clamped to 1-10.
#[must_use]
pub fn default_difficulty(doc_number: u32) -> i32 {
    i32::try_from(doc_number.clamp(1, 10)).unwrap_or(1)
}

// Saturating; NaN becomes 0.
#[allow(clippy::cast_possible_truncation)]
fn round_to_i32(value: f64) -> i32 {
    value.round() as i32
}

/// Removes one leading and one trailing code fence marker, then trims.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let start = LEADING_FENCE
        .as_ref()
        .and_then(|re| re.find(raw))
        .map_or(0, |m| m.end());
    let rest = &raw[start..];
    let end = TRAILING_FENCE
        .as_ref()
        .and_then(|re| re.find(rest))
        .map_or(rest.len(), |m| m.start());
    rest[..end].trim()
}
