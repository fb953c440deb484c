
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::{GuideError, Result};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const COMPLETION_TEMPERATURE: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Seam between the orchestrator and the language model so the degrade path
/// (call, retry, template) is testable without a network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Blocking client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    endpoint: Url,
    model: String,
    api_key: String,
    agent: ureq::Agent,
    retry_attempts: u32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .api_key()
            .map_err(|e| GuideError::Config(e.to_string()))?;
        Self::with_api_key(config, api_key)
    }

    /// Construct with an explicit key instead of reading the environment.
    #[inline]
    pub fn with_api_key(config: &Config, api_key: String) -> Result<Self> {
        config
            .openai
            .api_base_url()
            .map_err(|e| GuideError::Config(e.to_string()))?;
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            config.openai.api_base.trim_end_matches('/')
        ))
        .map_err(|e| GuideError::Config(format!("invalid completions endpoint: {e}")))?;

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.openai.request_timeout_secs)))
            .build()
            .into();

        Ok(Self {
            endpoint,
            model: config.openai.chat_model.clone(),
            api_key,
            agent,
            retry_attempts: config.openai.retry_attempts,
            // Word budget leaves generous token headroom; the contract
            // validator is what actually enforces reply length.
            max_tokens: (config.reply.word_budget * 4) as u32,
        })
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn complete_blocking(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: COMPLETION_TEMPERATURE,
            max_tokens: self.max_tokens,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| GuideError::Service(format!("failed to serialize request: {e}")))?;

        let response_text = self.send_with_retry(&request_json)?;

        let response: CompletionResponse = serde_json::from_str(&response_text)
            .map_err(|e| GuideError::Service(format!("failed to parse completion response: {e}")))?;

        let reply = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if reply.trim().is_empty() {
            return Err(GuideError::Service(
                "completion endpoint returned an empty reply".to_string(),
            ));
        }

        debug!("Completion returned {} chars", reply.len());
        Ok(reply)
    }

    fn send_with_retry(&self, body: &str) -> Result<String> {
        let auth = format!("Bearer {}", self.api_key);
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Completion request attempt {}/{}",
                attempt, self.retry_attempts
            );

            let outcome = self
                .agent
                .post(self.endpoint.as_str())
                .header("Authorization", &auth)
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string());

            match outcome {
                Ok(text) => return Ok(text),
                Err(ureq::Error::StatusCode(status)) if status == 401 || status == 403 => {
                    return Err(GuideError::Config(format!(
                        "completion endpoint rejected credentials (HTTP {status})"
                    )));
                }
                Err(ureq::Error::StatusCode(status)) if status == 429 || status >= 500 => {
                    warn!(
                        "Completion endpoint returned HTTP {}, attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    last_error = Some(GuideError::Service(format!(
                        "completion endpoint returned HTTP {status}"
                    )));
                }
                Err(ureq::Error::StatusCode(status)) => {
                    return Err(GuideError::Service(format!(
                        "completion request failed with HTTP {status}"
                    )));
                }
                Err(
                    error @ (ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_)),
                ) => {
                    warn!(
                        "Completion transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(GuideError::Service(format!("transport error: {error}")));
                }
                Err(error) => {
                    return Err(GuideError::Service(format!(
                        "completion request failed: {error}"
                    )));
                }
            }

            if attempt < self.retry_attempts {
                let delay =
                    Duration::from_millis(EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        Err(last_error
            .unwrap_or_else(|| GuideError::Service("completion request failed".to_string())))
    }
}

#[async_trait]
impl CompletionBackend for ChatClient {
    #[inline]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete_blocking(messages)
    }
}
