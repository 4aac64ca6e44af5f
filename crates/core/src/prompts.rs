//! Prompt templates sent to the question oracle.
//!
//! Templates use `{name}` placeholders. Any template can be replaced at runtime
//! (the services load `<key>.md` files from a prompts directory).

use crate::config::InterviewConfig;
use crate::session_state::Turn;
use std::collections::HashMap;

pub const OPENING: &str = "opening";
pub const CONTINUATION: &str = "continuation";
pub const OBSERVER_FOLLOWUP: &str = "observer_followup";
pub const FEEDBACK: &str = "feedback";

const DEFAULT_OPENING: &str = r#"You are Sarah, the lead interviewer on a three-person interview panel.
Start a {interview_type} interview at {difficulty} difficulty.
Ask exactly ONE opening question. Respond with the question only, no preamble."#;

const DEFAULT_CONTINUATION: &str = r#"You are Sarah, the lead interviewer on a three-person interview panel.
This is a {interview_type} interview at {difficulty} difficulty.

The candidate was asked: "{question}"
The candidate answered: "{answer}"

Continue the interview with the next main question. Do not repeat the previous question.
Ask exactly ONE question. Respond with the question only, no preamble."#;

const DEFAULT_OBSERVER_FOLLOWUP: &str = r#"You are Lisa, a quiet and detail-oriented observer on an interview panel.
The candidate just said: "{answer}"

Ask ONE short clarifying follow-up question about something specific they just said.
Respond with the question only, no preamble."#;

const DEFAULT_FEEDBACK: &str = r#"You are an expert interview coach analyzing a panel interview.

INTERVIEW TRANSCRIPT:
{transcript}

Additional context:
- Number of interruptions from the panel: {interruption_count}

Analyze the performance based on the ACTUAL answers above. Be specific and reference what the candidate said.

Respond with ONLY valid JSON (no markdown, no extra text):
{
  "overallScore": <number 0-100>,
  "confidenceScore": <number 0-100>,
  "communicationScore": <number 0-100>,
  "technicalScore": <number 0-100>,
  "strengths": ["specific strength", "another strength"],
  "improvements": ["specific improvement", "another improvement"],
  "summary": "2-3 sentences mentioning specific things they said",
  "weaknessRadar": {
    "clarity": <number 0-100>,
    "structure": <number 0-100>,
    "technicalDepth": <number 0-100>,
    "confidence": <number 0-100>,
    "relevance": <number 0-100>
  },
  "interviewerFeedback": {
    "lead": "feedback about their main answers",
    "interrupter": "feedback about handling pressure",
    "observer": "feedback about details provided"
  }
}"#;

const NO_ANSWER: &str = "No answer provided";

#[derive(Debug, Clone)]
pub struct PromptSet {
    templates: HashMap<String, String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        let templates = [
            (OPENING, DEFAULT_OPENING),
            (CONTINUATION, DEFAULT_CONTINUATION),
            (OBSERVER_FOLLOWUP, DEFAULT_OBSERVER_FOLLOWUP),
            (FEEDBACK, DEFAULT_FEEDBACK),
        ]
        .into_iter()
        .map(|(key, body)| (key.to_string(), body.to_string()))
        .collect();
        Self { templates }
    }
}

impl PromptSet {
    /// Built-in templates with any matching keys replaced by `overrides`.
    /// Unknown keys are ignored.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut set = Self::default();
        for (key, body) in overrides {
            if let Some(slot) = set.templates.get_mut(&key) {
                *slot = body;
            } else {
                tracing::warn!("Ignoring unknown prompt template '{}'", key);
            }
        }
        set
    }

    fn template(&self, key: &str) -> &str {
        self.templates.get(key).map(String::as_str).unwrap_or_default()
    }

    pub fn opening(&self, config: &InterviewConfig) -> String {
        render(
            self.template(OPENING),
            &[
                ("interview_type", config.interview_type.as_str()),
                ("difficulty", config.difficulty.as_str()),
            ],
        )
    }

    pub fn continuation(&self, config: &InterviewConfig, question: &str, answer: &str) -> String {
        render(
            self.template(CONTINUATION),
            &[
                ("interview_type", config.interview_type.as_str()),
                ("difficulty", config.difficulty.as_str()),
                ("question", question),
                ("answer", or_no_answer(answer)),
            ],
        )
    }

    /// Seeded only by the answer just given; the Observer never sees the wider history.
    pub fn observer_followup(&self, answer: &str) -> String {
        render(
            self.template(OBSERVER_FOLLOWUP),
            &[("answer", or_no_answer(answer))],
        )
    }

    pub fn feedback(&self, history: &[Turn], interruption_count: usize) -> String {
        let transcript = render_transcript(history);
        let count = interruption_count.to_string();
        render(
            self.template(FEEDBACK),
            &[
                ("transcript", transcript.as_str()),
                ("interruption_count", count.as_str()),
            ],
        )
    }
}

/// `Q1: ...\nA1: ...` blocks separated by blank lines.
pub fn render_transcript(history: &[Turn]) -> String {
    if history.is_empty() {
        return "(no questions were answered)".to_string();
    }
    history
        .iter()
        .enumerate()
        .map(|(idx, turn)| {
            let n = idx + 1;
            format!("Q{n}: {}\nA{n}: {}", turn.question, or_no_answer(&turn.answer))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn or_no_answer(answer: &str) -> &str {
    if answer.trim().is_empty() {
        NO_ANSWER
    } else {
        answer
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}
