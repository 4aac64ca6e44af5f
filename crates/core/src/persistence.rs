//! Best-effort hand-off of finished interviews to the interview API.

use crate::config::InterviewConfig;
use crate::feedback::Scorecard;
use crate::interviewer::InterviewerId;
use crate::session_state::{Interruption, Turn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConfig {
    #[serde(rename = "type")]
    pub interview_type: String,
    pub difficulty: String,
    pub mode: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedQuestion {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub interview_type: String,
    pub speaker_id: InterviewerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedAnswer {
    pub question_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST /api/interviews`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewRecord {
    pub user_id: String,
    pub config: SavedConfig,
    pub questions: Vec<SavedQuestion>,
    pub answers: Vec<SavedAnswer>,
    pub interruptions: Vec<Interruption>,
    pub feedback: Scorecard,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl InterviewRecord {
    /// Observer turns are recorded as follow-ups to the question before them.
    pub fn from_panel(
        user_id: &str,
        config: &InterviewConfig,
        history: &[Turn],
        interruptions: &[Interruption],
        feedback: &Scorecard,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        let interview_type = config.interview_type.as_str().to_string();
        let mut questions = Vec::with_capacity(history.len());
        let mut answers = Vec::with_capacity(history.len());

        for (idx, turn) in history.iter().enumerate() {
            let id = format!("q{}", idx + 1);
            let follow_up_to = (turn.speaker_id == InterviewerId::Observer && idx > 0)
                .then(|| format!("q{idx}"));
            questions.push(SavedQuestion {
                id: id.clone(),
                text: turn.question.clone(),
                interview_type: interview_type.clone(),
                speaker_id: turn.speaker_id,
                follow_up_to,
            });
            answers.push(SavedAnswer {
                question_id: id,
                text: turn.answer.clone(),
                timestamp: turn.answered_at,
            });
        }

        Self {
            user_id: user_id.to_string(),
            config: SavedConfig {
                interview_type,
                difficulty: config.difficulty.as_str().to_string(),
                mode: "panel",
            },
            questions,
            answers,
            interruptions: interruptions.to_vec(),
            feedback: feedback.clone(),
            started_at,
            ended_at,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn save(&self, record: &InterviewRecord) -> Result<()>;
}

/// Saves interviews through the HTTP interview API.
pub struct HttpInterviewStore {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpInterviewStore {
    pub fn new(base_url: String, token: Option<SecretString>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for the interview API")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl InterviewStore for HttpInterviewStore {
    async fn save(&self, record: &InterviewRecord) -> Result<()> {
        let url = format!("{}/api/interviews", self.base_url);
        let mut request = self.client.post(&url).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to reach interview API at {url}"))?
            .error_for_status()
            .context("Interview API rejected the interview")?;
        Ok(())
    }
}
