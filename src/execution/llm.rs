//! LLM invocation.
//!
//! [`LlmClient`] is the provider boundary (one chat-completion request).
//! [`LlmCaller`] wraps a client with timing and a bounded timeout and folds
//! every fault into an [`LlmCallResult`], so callers always get a value back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

/// Default Anthropic Messages API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One provider request: system prompt plus a single user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRequest {
    pub model: String,
    pub system: String,
    pub user_message: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageResponse {
    /// Text content blocks, in response order
    pub text_blocks: Vec<String>,
    pub usage: Option<TokenUsage>,
}

/// Classified provider faults. The invoker labels its error string with
/// [`LlmClientError::label`]; unclassified faults are labelled `ApiError`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmClientError {
    #[error("Request to Anthropic API failed: {0}")]
    Transport(String),

    #[error("Anthropic API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse Anthropic response: {0}")]
    Decode(String),
}

impl LlmClientError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transport(_) => "ConnectionError",
            Self::Status { .. } => "ApiStatusError",
            Self::Decode(_) => "DecodeError",
        }
    }
}

/// Provider boundary. Errors are provider faults (transport, auth, status).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn create_message(&self, request: MessageRequest) -> Result<MessageResponse>;
}

/// HTTP client for Anthropic's Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

impl AnthropicResponse {
    fn into_message_response(self) -> MessageResponse {
        let text_blocks = self
            .content
            .into_iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text)
            .collect();
        MessageResponse {
            text_blocks,
            usage: self.usage,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn create_message(&self, request: MessageRequest) -> Result<MessageResponse> {
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.user_message,
            }],
        };

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmClientError::Transport(format!("{:#}", anyhow::Error::from(e))))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmClientError::Decode(format!("{:#}", anyhow::Error::from(e))))?;
        Ok(parsed.into_message_response())
    }
}

/// Outcome of one model call. Exactly one of text or error is present.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    Completed {
        response_text: String,
        token_usage: Option<TokenUsage>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmCallResult {
    /// Wall-clock time around the call, reported for either outcome
    pub execution_time_ms: u64,
    pub outcome: LlmOutcome,
}

impl LlmCallResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, LlmOutcome::Completed { .. })
    }

    pub fn response_text(&self) -> Option<&str> {
        match &self.outcome {
            LlmOutcome::Completed { response_text, .. } => Some(response_text),
            LlmOutcome::Failed { .. } => None,
        }
    }

    pub fn token_usage(&self) -> Option<TokenUsage> {
        match &self.outcome {
            LlmOutcome::Completed { token_usage, .. } => *token_usage,
            LlmOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            LlmOutcome::Failed { error } => Some(error),
            LlmOutcome::Completed { .. } => None,
        }
    }
}

fn error_label(error: &anyhow::Error) -> &'static str {
    error
        .downcast_ref::<LlmClientError>()
        .map_or("ApiError", LlmClientError::label)
}

/// Parameters of a single invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Model invocation that never fails: faults come back inside the result.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn call(&self, request: &LlmRequest) -> LlmCallResult;
}

pub struct LlmCaller {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmCaller {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl LlmInvoker for LlmCaller {
    async fn call(&self, request: &LlmRequest) -> LlmCallResult {
        debug!(
            model = %request.model,
            max_tokens = request.max_tokens,
            temperature = request.temperature,
            "Calling LLM"
        );

        let started = Instant::now();
        let message = MessageRequest {
            model: request.model.clone(),
            system: request.system_prompt.clone(),
            user_message: request.user_message.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let outcome =
            match tokio::time::timeout(self.timeout, self.client.create_message(message)).await {
                Err(_) => LlmOutcome::Failed {
                    error: format!(
                        "Timeout: LLM call exceeded {}s",
                        self.timeout.as_secs()
                    ),
                },
                Ok(Err(e)) => LlmOutcome::Failed {
                    error: format!("{}: {:#}", error_label(&e), e),
                },
                Ok(Ok(response)) => match response.text_blocks.into_iter().next() {
                    Some(response_text) => LlmOutcome::Completed {
                        response_text,
                        token_usage: response.usage,
                    },
                    None => LlmOutcome::Failed {
                        error: "EmptyResponse: response contained no text content".to_string(),
                    },
                },
            };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            LlmOutcome::Completed { token_usage, .. } => debug!(
                elapsed_ms = execution_time_ms,
                input_tokens = ?token_usage.map(|u| u.input_tokens),
                output_tokens = ?token_usage.map(|u| u.output_tokens),
                "LLM call succeeded"
            ),
            LlmOutcome::Failed { error } => {
                error!(elapsed_ms = execution_time_ms, error = %error, "LLM call failed")
            }
        }

        LlmCallResult {
            execution_time_ms,
            outcome,
        }
    }
}
