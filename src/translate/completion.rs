//! Client for an OpenAI-compatible chat completion endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::prompt::Prompt;
use super::retry::RetryPolicy;

/// Response bodies kept on errors are cut to this many bytes.
const MAX_ERROR_BODY: usize = 2_048;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Sampling temperature for SQL generation. Keep it low.
    pub temperature: f32,
    pub analysis_temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://api.deepseek.com/v1/chat/completions"),
            model: String::from("deepseek-chat"),
            api_key: String::new(),
            temperature: 0.1,
            analysis_temperature: 0.7,
            max_tokens: None,
            timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode completion response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("completion response contained no choices")]
    NoChoices,
    #[error("completion contained no SQL after cleanup")]
    EmptySql,
}

impl CompletionError {
    /// Transient failures worth another attempt: transport errors,
    /// timeouts, rate limiting and server errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport(_) | CompletionError::Timeout(_) => true,
            CompletionError::Status { status, .. } => *status == 429 || *status >= 500,
            CompletionError::Decode(_) | CompletionError::NoChoices | CompletionError::EmptySql => {
                false
            }
        }
    }
}

/// Anything that can turn a prompt into model text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &Prompt, temperature: f32) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn chat_messages(prompt: &Prompt) -> Vec<ChatMessage<'_>> {
    let mut messages = Vec::with_capacity(2);
    if !prompt.system.is_empty() {
        messages.push(ChatMessage {
            role: "system",
            content: &prompt.system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &prompt.user,
    });
    messages
}

/// Extract `choices[0].message.content` from a response body. A null
/// content reads as the empty string.
pub fn parse_completion_body(body: &str) -> Result<String, CompletionError> {
    let response: ChatResponse = serde_json::from_str(body).map_err(CompletionError::Decode)?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(CompletionError::NoChoices)?;
    Ok(choice.message.content.unwrap_or_default())
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}

/// HTTP completion client. Cheap to clone; clones share the connection
/// pool.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: Option<u32>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(CompletionError::Transport)?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            timeout,
            retry: config.retry.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<String, CompletionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        parse_completion_body(&body)
    }

    fn classify(&self, err: reqwest::Error) -> CompletionError {
        if err.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            CompletionError::Transport(err)
        }
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(&self, prompt: &Prompt, temperature: f32) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: chat_messages(prompt),
            temperature,
            max_tokens: self.max_tokens,
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(content) => {
                    debug!(model = %self.model, attempt, chars = content.len(), "completion received");
                    return Ok(content);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "completion call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
