use crate::extract::parse_json_object;
use crate::interviewer::InterviewerId;
use crate::oracle::{QuestionOracle, is_connection_failure};
use crate::prompts::PromptSet;
use crate::session_state::Turn;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const FEEDBACK_UNAVAILABLE: &str = "AI feedback unavailable - see summary for instructions";

/// Axis scores for the weakness radar chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessRadar {
    pub clarity: f64,
    pub structure: f64,
    pub technical_depth: f64,
    pub confidence: f64,
    pub relevance: f64,
}

/// One line of feedback per panel persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InterviewerFeedback {
    pub lead: String,
    pub interrupter: String,
    pub observer: String,
}

impl InterviewerFeedback {
    pub fn get(&self, id: InterviewerId) -> &str {
        match id {
            InterviewerId::Lead => &self.lead,
            InterviewerId::Interrupter => &self.interrupter,
            InterviewerId::Observer => &self.observer,
        }
    }
}

/// The end-of-interview scorecard. Scores are nominally 0-100 but are passed
/// through from the oracle unchecked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scorecard {
    pub overall_score: f64,
    pub confidence_score: f64,
    pub communication_score: f64,
    pub technical_score: f64,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
    pub weakness_radar: WeaknessRadar,
    pub interviewer_feedback: InterviewerFeedback,
}

impl Scorecard {
    /// The degraded scorecard shown when synthesis fails. It still tells the
    /// candidate how to get real feedback next time.
    pub fn fallback(err: &anyhow::Error) -> Self {
        let (improvement, summary) = if is_connection_failure(err) {
            (
                "Start the feedback engine to get AI-powered scoring (for a local setup run `ollama serve`)".to_string(),
                "The feedback engine was unreachable, so this interview could not be scored. \
                 To get real feedback: 1) install Ollama from ollama.com, 2) run `ollama pull llama3.2:3b`, \
                 3) run `ollama serve`, 4) redo the interview."
                    .to_string(),
            )
        } else {
            (
                "Check the service logs for the feedback error details".to_string(),
                format!(
                    "The feedback engine answered but its scorecard could not be used ({err:#}). \
                     Check the service logs, then redo the interview."
                ),
            )
        };

        let unavailable = FEEDBACK_UNAVAILABLE.to_string();
        Self {
            overall_score: 0.0,
            confidence_score: 0.0,
            communication_score: 0.0,
            technical_score: 0.0,
            strengths: vec!["Interview completed".to_string()],
            improvements: vec![improvement],
            summary,
            weakness_radar: WeaknessRadar::default(),
            interviewer_feedback: InterviewerFeedback {
                lead: unavailable.clone(),
                interrupter: unavailable.clone(),
                observer: unavailable,
            },
        }
    }
}

/// Turns a finished panel into a scorecard with a single oracle call.
#[derive(Clone)]
pub struct FeedbackSynthesizer {
    oracle: Arc<dyn QuestionOracle>,
    prompts: PromptSet,
}

impl FeedbackSynthesizer {
    pub fn new(oracle: Arc<dyn QuestionOracle>, prompts: PromptSet) -> Self {
        Self { oracle, prompts }
    }

    /// Never fails: any synthesis error is replaced by [`Scorecard::fallback`].
    pub async fn synthesize(&self, history: &[Turn], interruption_count: usize) -> Scorecard {
        match self.try_synthesize(history, interruption_count).await {
            Ok(scorecard) => {
                tracing::info!(
                    overall = scorecard.overall_score,
                    "Feedback synthesized for {} answered questions",
                    history.len()
                );
                scorecard
            }
            Err(e) => {
                tracing::warn!("Feedback synthesis failed, using fallback scorecard: {:#}", e);
                Scorecard::fallback(&e)
            }
        }
    }

    async fn try_synthesize(&self, history: &[Turn], interruption_count: usize) -> Result<Scorecard> {
        let prompt = self.prompts.feedback(history, interruption_count);
        tracing::debug!("Feedback prompt:\n{}", prompt);

        let raw = self
            .oracle
            .complete(&prompt)
            .await
            .context("Feedback oracle call failed")?;

        let scorecard = parse_json_object::<Scorecard>(&raw)
            .into_result()
            .context("Feedback response was not a usable scorecard")?;
        Ok(scorecard)
    }
}
