//! Prompts sent to the upstream language model.

use std::fmt::Write as _;

use crate::lesson::{DocumentContext, GenerationRequest};

/// Marker shown in place of a missing answer.
pub const NO_ANSWER: &str = "(no answer)";

/// System instruction describing the tutor's teaching policy and output format.
pub const SYSTEM_PROMPT: &str = r#"You are the teaching engine of Bloom, a one-to-one AI tutor modelled on Benjamin Bloom's 2 Sigma research.

## Principles
1. Mastery learning: the learner must reach 80-90% understanding of the current material before difficulty increases.
2. One-to-one tutoring: you ask targeted questions and the learner only answers them.
3. Adaptive difficulty: the quality of each answer decides the difficulty of the next document.
4. Socratic guidance: lead the learner to the answer through questions instead of stating it.

## Output format
Return a single JSON object and nothing else (no markdown code fences):
{
  "title": "Document title",
  "content": "Lesson body as HTML using <h3>, <p>, <strong>, <ul>/<ol>/<li> and <blockquote>",
  "questions": ["Diagnostic question 1", "Diagnostic question 2", "Diagnostic question 3"],
  "difficultyLevel": 1-10,
  "masteryEstimate": 0-100
}

## Content rules
- Each document is 600-1000 words.
- Go beyond the surface; explain why, not only what.
- Make abstract ideas concrete with analogies and metaphors.
- Bold key concepts with <strong>.
- Diagnostic questions are open-ended and test depth of understanding, not recall."#;

/// Builds the user message for `request`.
///
/// A follow-up lists every previous question next to the answer at the same
/// position, or [`NO_ANSWER`] when there is none.
#[must_use]
pub fn user_message(request: &GenerationRequest) -> String {
    match request.context() {
        DocumentContext::First => format!(
            "Generate the first, introductory lesson document for this topic.\n\n\
             Topic: {}\n\n\
             This is the learner's first document and their level is unknown. \
             Start at a moderate introductory difficulty and cover the most fundamental \
             concepts of the field. Design the diagnostic questions to reveal the learner's \
             current level.",
            request.topic
        ),
        DocumentContext::FollowUp {
            previous_questions,
            previous_answers,
        } => {
            let mut history = String::new();
            for (i, question) in previous_questions.iter().enumerate() {
                let answer = previous_answers
                    .get(i)
                    .map(String::as_str)
                    .filter(|a| !a.is_empty())
                    .unwrap_or(NO_ANSWER);
                if i > 0 {
                    history.push_str("\n\n");
                }
                let _ = write!(
                    history,
                    "Question {n}: {question}\nAnswer {n}: {answer}",
                    n = i + 1
                );
            }

            format!(
                "Generate lesson document #{} for this topic.\n\n\
                 Topic: {}\n\n\
                 The learner's previous diagnostic questions and answers:\n{history}\n\n\
                 Analyse how deeply the learner understands the material, then:\n\
                 - if the answers show solid understanding, raise the difficulty\n\
                 - if the answers show weak understanding, lower the difficulty and re-explain with a new analogy and angle\n\
                 - if the answers are mixed, reinforce the weak areas specifically\n\n\
                 Generate the next lesson document at the right difficulty with new diagnostic questions.",
                request.doc_number, request.topic
            )
        }
    }
}
