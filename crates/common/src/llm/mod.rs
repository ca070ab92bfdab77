//! Generation capability abstraction
//!
//! Two invocation kinds share one trait:
//! - `complete`: a blocking call, used by the query planner
//! - `stream`: incremental text, used by the answer composer
//!
//! Both report token usage. Retry policy belongs to whoever wraps these
//! calls; the clients here make exactly one attempt.

mod openai;
mod scripted;

pub use openai::OpenAIChatClient;
pub use scripted::{ScriptedChatModel, ScriptedReply};

use crate::config::LlmConfig;
use crate::errors::Result;
use crate::models::ChatMessage;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use std::sync::Arc;

/// Request sent to the generation capability
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub seed: Option<u64>,
    /// Ask for a JSON object reply
    pub json_response: bool,
}

impl ChatRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            max_tokens: 1024,
            temperature: 0.0,
            seed: None,
            json_response: false,
        }
    }
}

/// Token counters reported by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self { prompt_tokens, completion_tokens }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Result of a blocking completion
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

/// One item of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// Incremental answer text
    Delta(String),
    /// Token usage, reported once near the end of the stream
    Usage(TokenUsage),
}

/// Streamed completion. Dropping it closes the underlying connection.
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// The external generation capability
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce a whole reply at once
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;

    /// Produce a reply incrementally
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream>;

    /// Model identifier, for traces and metrics
    fn model_name(&self) -> &str;
}

/// Build the generation and planning clients from configuration.
///
/// Without an API key both are scripted models that echo canned replies,
/// which keeps a development gateway usable offline.
pub fn create_chat_models(config: &LlmConfig) -> Result<(Arc<dyn ChatModel>, Arc<dyn ChatModel>)> {
    match &config.api_key {
        Some(key) if !key.is_empty() => {
            let chat = OpenAIChatClient::new(config, config.chat_model.clone(), key.clone())?;
            let planner = OpenAIChatClient::new(config, config.planner_model.clone(), key.clone())?;
            Ok((Arc::new(chat), Arc::new(planner)))
        }
        _ => {
            tracing::warn!("llm.api_key not set, using scripted offline models");
            Ok((
                Arc::new(ScriptedChatModel::offline()),
                Arc::new(ScriptedChatModel::offline()),
            ))
        }
    }
}
