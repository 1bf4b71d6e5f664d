//! Plan requester: builds the plan prompt for a project goal and sends it to
//! an OpenAI-compatible chat-completion service in JSON mode.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "qwen/qwen3-32b";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Longest error body kept in [`GenerationError::Status`].
const MAX_ERROR_BODY: usize = 512;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The completion service could not produce a plan payload.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured for the completion service")]
    MissingApiKey,

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response contained no message content")]
    EmptyCompletion,
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// Build the single user-role instruction asking for a JSON plan for `goal`.
pub fn build_plan_prompt(goal: &str) -> String {
    let goal = goal.trim().replace('"', "'");
    format!(
        "Analyze the following project goal: \"{goal}\". Based on your analysis, generate a \
         detailed project plan as a JSON object. The JSON object must contain a \"tasks\" array. \
         Each task in the array must have a \"name\" (unique among its siblings), a \"duration\" \
         (a number of days), a list of \"dependencies\" (an array of names of sibling tasks that \
         must finish first), and a \"subtasks\" array. Each subtask has the same shape: \"name\", \
         \"duration\", \"dependencies\" and \"subtasks\". Break the project down into a \
         comprehensive list of tasks and subtasks so that every step is captured. Respond with \
         the JSON object only."
    )
}

// ---------------------------------------------------------------------------
// Client seam
// ---------------------------------------------------------------------------

/// A text-completion backend that answers a prompt with a JSON document.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` as a single user message, asking for a JSON object, and
    /// return the raw message content of the first completion.
    async fn complete_json(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Connection settings for [`ChatCompletionsClient`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Base URL without trailing `/chat/completions`.
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// [`CompletionClient`] for the OpenAI-compatible `/chat/completions`
/// endpoint (Groq by default).
pub struct ChatCompletionsClient {
    client: Client,
    config: LlmConfig,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        if config.model != DEFAULT_MODEL {
            info!(model = %config.model, "using custom completion model");
        }

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for ChatCompletionsClient {
    async fn complete_json(&self, prompt: &str) -> Result<String, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GenerationError::MissingApiKey)?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        info!(model = %request.model, "requesting plan completion");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(GenerationError::EmptyCompletion)?;

        debug!(bytes = content.len(), "plan completion received");
        Ok(content)
    }
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
