// crates/vitrina-server/src/llm/mod.rs
// Chat-completions client (OpenAI-compatible format)

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Pause after the first failed attempt; doubles up to [`BACKOFF_CEILING`].
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const BACKOFF_CEILING: Duration = Duration::from_secs(6);

/// Message in a conversation
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String, // "system" | "user"
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// JSON-object response format directive
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String, // "json_object"
}

/// Chat completion request (OpenAI-compatible format)
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
}

/// Why one completion attempt failed, and whether another try makes sense.
enum AttemptError {
    /// Network trouble or an overloaded upstream; worth another try.
    Transient(String),
    /// A definitive upstream answer (bad request, auth); retrying cannot help.
    Permanent(String),
}

/// Chat-completions client for the assistant. Every call sends one user
/// message, expects a JSON object back, and reattempts transient failures
/// with a capped exponential pause.
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_attempts: u32,
}

impl ChatClient {
    pub fn new(
        http: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
        max_attempts: u32,
    ) -> Self {
        Self {
            http,
            api_key,
            base_url,
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Send a single-user-message completion request and return the raw
    /// content of the first choice.
    pub async fn complete_json(
        &self,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        if !self.is_configured() {
            return Err(anyhow!("LLM API key is not configured"));
        }

        let call_id = Uuid::new_v4();
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::user(prompt)],
            temperature,
            max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object".into(),
            },
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let mut pause = INITIAL_BACKOFF;
        let mut attempt = 0;
        let raw = loop {
            attempt += 1;
            match self.send_once(&url, &request).await {
                Ok(body) => break body,
                Err(AttemptError::Permanent(reason)) => {
                    return Err(anyhow!("chat completion rejected: {reason}"));
                }
                Err(AttemptError::Transient(reason)) if attempt < self.max_attempts => {
                    debug!(
                        %call_id,
                        attempt,
                        %reason,
                        pause_ms = pause.as_millis() as u64,
                        "Completion attempt failed, will retry"
                    );
                    tokio::time::sleep(pause).await;
                    pause = (pause * 2).min(BACKOFF_CEILING);
                }
                Err(AttemptError::Transient(reason)) => {
                    return Err(anyhow!(
                        "chat completion failed after {attempt} attempts: {reason}"
                    ));
                }
            }
        };

        let json: serde_json::Value = serde_json::from_str(&raw).context("parse chat response")?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("chat response missing choices[0].message.content"))
    }

    /// One HTTP round-trip, classified for the retry loop.
    async fn send_once(
        &self,
        url: &str,
        request: &ChatRequest,
    ) -> std::result::Result<String, AttemptError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .text()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()));
        }

        let detail = response.text().await.unwrap_or_default();
        if retry_worthwhile(status) {
            Err(AttemptError::Transient(format!("HTTP {status}: {detail}")))
        } else {
            Err(AttemptError::Permanent(format!("HTTP {status}: {detail}")))
        }
    }
}

/// Only rate limiting and server-side trouble justify another attempt; any
/// other 4xx is a definitive answer.
fn retry_worthwhile(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
