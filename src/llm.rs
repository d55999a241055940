//! Completion provider adapter.
//!
//! A [`CompletionProvider`] performs one chat-completion request and
//! returns a [`Completion`]: either the two answer fields decoded from the
//! provider's structured-output channel, or the raw text when the content
//! is not that object. Callers never probe the response shape themselves.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::embedding::{http_client, read_json};
use crate::error::ProviderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// What a provider returned for one completion request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Fields read from the structured-output channel. `raw` is the
    /// undecoded content, kept for the text-recovery fallback.
    Structured {
        rationale: String,
        answer: String,
        raw: String,
    },
    Raw(String),
}

impl Completion {
    pub fn raw_text(&self) -> &str {
        match self {
            Completion::Structured { raw, .. } => raw,
            Completion::Raw(text) => text,
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, messages: &[Message]) -> Result<Completion, ProviderError>;
}

pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[Message]) -> Result<Completion, ProviderError> {
        Err(ProviderError::Disabled("generation"))
    }
}

/// Any endpoint speaking the OpenAI chat-completions protocol
/// (Groq, OpenAI, Ollama's `/v1` compatibility layer).
pub struct OpenAiCompatible {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    structured_output: bool,
}

impl OpenAiCompatible {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let (default_url, key_var) = match config.provider.as_str() {
            "groq" => ("https://api.groq.com/openai/v1", Some("GROQ_API_KEY")),
            "openai" => ("https://api.openai.com/v1", Some("OPENAI_API_KEY")),
            "ollama" => ("http://localhost:11434/v1", None),
            other => bail!("Unknown generation provider: {}", other),
        };
        let api_key = match key_var {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            provider: config.provider.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            structured_output: config.structured_output,
        })
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if self.structured_output {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "repository_answer",
                    "strict": true,
                    "schema": answer_schema(),
                },
            });
        }
        body
    }
}

/// JSON schema of the two-field answer object.
pub fn answer_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "rationale": { "type": "string" },
            "answer": { "type": "string" },
        },
        "required": ["rationale", "answer"],
        "additionalProperties": false,
    })
}

#[derive(Deserialize)]
struct AnswerFields {
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    answer: String,
}

#[async_trait]
impl CompletionProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.provider
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion, ProviderError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(messages));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let json = read_json(&self.provider, response).await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ProviderError::Decode {
                provider: self.provider.clone(),
                message: "missing choices[0].message.content".to_string(),
            })?;

        Ok(classify_content(content, self.structured_output))
    }
}

/// Decide between [`Completion::Structured`] and [`Completion::Raw`].
pub(crate) fn classify_content(content: &str, structured_output: bool) -> Completion {
    if structured_output {
        if let Ok(fields) = serde_json::from_str::<AnswerFields>(content.trim()) {
            return Completion::Structured {
                rationale: fields.rationale,
                answer: fields.answer,
                raw: content.to_string(),
            };
        }
    }
    Completion::Raw(content.to_string())
}

/// | Config Value | Provider |
/// |-------------|----------|
/// | `"groq"`, `"openai"`, `"ollama"` | [`OpenAiCompatible`] |
/// | `"disabled"` | [`DisabledCompletion`] |
pub fn create_completion_provider(config: &GenerationConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        _ => Ok(Arc::new(OpenAiCompatible::new(config)?)),
    }
}
