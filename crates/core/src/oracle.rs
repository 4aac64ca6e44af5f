use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// Context attached to transport failures so the fallback path can tell an
/// unreachable oracle apart from other errors.
pub const UNREACHABLE_CONTEXT: &str = "oracle unreachable";

// The panel only ever needs "prompt in, text out". Keeping the oracle behind a
// trait lets the state machine and feedback synthesis be driven by `MockQuestionOracle`
// in tests, and lets the runtime pick a local Ollama model or a hosted
// OpenAI-compatible endpoint without the core knowing which.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuestionOracle: Send + Sync {
    /// Sends a free-text prompt and returns the raw completion.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Talks to an Ollama server's `/api/generate` endpoint.
pub struct OllamaOracle {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaOracle {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for Ollama")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl QuestionOracle for OllamaOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.7,
                "top_p": 0.9
            }
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{UNREACHABLE_CONTEXT} at {url}"))?
            .error_for_status()
            .context("Ollama returned a non-OK status")?
            .json::<GenerateResponse>()
            .await
            .context("Failed to decode Ollama response body")?;

        Ok(resp.response)
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

/// Talks to an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct ChatCompletionsOracle {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl ChatCompletionsOracle {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(
        base_url: String,
        api_key: SecretString,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for chat completions")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl QuestionOracle for ChatCompletionsOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.7
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{UNREACHABLE_CONTEXT} at {url}"))?
            .error_for_status()
            .context("Chat completions endpoint returned a non-OK status")?
            .json::<LlmResponse>()
            .await
            .context("Failed to decode chat completions response body")?;

        let answer = &resp
            .choices
            .first()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content;
        Ok(answer.clone())
    }
}

const CONNECTION_MARKERS: [&str; 6] = [
    UNREACHABLE_CONTEXT,
    "connection refused",
    "econnrefused",
    "error sending request",
    "failed to connect",
    "dns error",
];

/// True when the error chain says the oracle could not be reached at all, as
/// opposed to answering badly.
pub fn is_connection_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            if req.is_connect() || req.is_timeout() {
                return true;
            }
        }
        let text = cause.to_string().to_lowercase();
        CONNECTION_MARKERS.iter().any(|marker| text.contains(marker))
    })
}
