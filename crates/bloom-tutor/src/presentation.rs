//! Presentation adapter.
//!
//! A [`LessonView`] is everything a front end needs to show one document. It is
//! built in one step from the session and the emitted document, so a renderer
//! never sees the document number, questions and mastery out of step.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lesson::LessonDocument;
use crate::session::{GenerationMode, Session};

/// Width of the text progress bar, in cells.
const PROGRESS_WIDTH: usize = 20;

static TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<[^>]+>").ok());
static LIST_ITEM: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)<li[^>]*>").ok());
static BLOCK_END: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)</(?:h[1-6]|p|ul|ol|blockquote)>").ok());
static BLANK_LINES: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\n{3,}").ok());

/// One document as shown to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonView {
    /// Displayed document number (1-indexed).
    pub document_number: u32,
    /// Subject being learned.
    pub topic: String,
    /// Document title.
    pub title: String,
    /// Rich-text body, passed through untouched.
    pub content: String,
    /// Diagnostic questions, in order.
    pub questions: Vec<String>,
    /// Difficulty reported with the document.
    pub difficulty_level: i32,
    /// Session mastery clamped to 0..=100.
    pub mastery_percent: u8,
    /// Live or fallback badge.
    pub mode: GenerationMode,
}

impl LessonView {
    /// Builds the view for `lesson` after it has been applied to `session`.
    #[must_use]
    pub fn new(session: &Session, lesson: &LessonDocument) -> Self {
        Self {
            document_number: session.next_document_number(),
            topic: session.topic.clone(),
            title: lesson.title.clone(),
            content: lesson.content.clone(),
            questions: lesson.questions.clone(),
            difficulty_level: lesson.difficulty_level,
            mastery_percent: clamp_mastery(session.mastery_estimate),
            mode: session.mode(),
        }
    }
}

/// Clamps a mastery estimate to a displayable percentage.
///
/// # Examples
///
/// ```
/// use bloom_tutor::presentation::clamp_mastery;
///
/// assert_eq!(clamp_mastery(137), 100);
/// assert_eq!(clamp_mastery(-5), 0);
/// assert_eq!(clamp_mastery(40), 40);
/// ```
#[must_use]
pub fn clamp_mastery(estimate: i32) -> u8 {
    u8::try_from(estimate.clamp(0, 100)).unwrap_or(0)
}

/// Renders a view as plain text for a terminal.
#[must_use]
pub fn render_text(view: &LessonView) -> String {
    let mut out = String::new();
    let filled = usize::from(view.mastery_percent) * PROGRESS_WIDTH / 100;

    let _ = writeln!(out, "Lesson #{} · {}", view.document_number, view.topic);
    let _ = writeln!(out, "{}  difficulty {}", view.mode.badge(), view.difficulty_level);
    let _ = writeln!(
        out,
        "Mastery [{}{}] {}%",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled),
        view.mastery_percent
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", view.title);
    let _ = writeln!(out, "{}", "=".repeat(view.title.chars().count()));
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", plain_text(&view.content));
    let _ = writeln!(out);
    let _ = writeln!(out, "Questions:");
    for (i, question) in view.questions.iter().enumerate() {
        let _ = writeln!(out, "  {}. {question}", i + 1);
    }
    out
}

/// Drops markup from a rich-text body, keeping list items on their own lines.
fn plain_text(content: &str) -> String {
    let text = replace_all(&LIST_ITEM, content, "\n  • ");
    let text = replace_all(&BLOCK_END, &text, "\n\n");
    let text = replace_all(&TAG, &text, "");
    replace_all(&BLANK_LINES, &text, "\n\n").trim().to_string()
}

fn replace_all(pattern: &Lazy<Option<Regex>>, text: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}
