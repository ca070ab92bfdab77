//! OpenAI-compatible chat completions client
//!
//! Blocking completions go through a plain JSON POST; streamed completions
//! read server-sent events and surface `ChatChunk`s as they arrive.

use super::{ChatChunk, ChatCompletion, ChatModel, ChatRequest, ChatStream, TokenUsage};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

pub struct OpenAIChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIChatClient {
    pub fn new(config: &LlmConfig, model: String, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        }));
        messages.extend(request.messages.iter().map(|m| {
            serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content,
            })
        }));

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        if let Some(seed) = request.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if request.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<UsagePayload> for TokenUsage {
    fn from(u: UsagePayload) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

/// Turn one server-sent event payload into zero or more chunks
fn parse_stream_event(data: &str) -> Result<Vec<ChatChunk>> {
    let payload: StreamPayload = serde_json::from_str(data)?;
    let mut chunks = Vec::new();

    for choice in payload.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            chunks.push(ChatChunk::Delta(text));
        }
    }
    if let Some(usage) = payload.usage {
        chunks.push(ChatChunk::Usage(usage.into()));
    }

    Ok(chunks)
}

struct StreamState {
    source: EventSource,
    pending: VecDeque<ChatChunk>,
}

#[async_trait]
impl ChatModel for OpenAIChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        debug!(model = %self.model, messages = request.messages.len(), "complete: called");

        let response = self.http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(&request, false))
            .send()
            .await
            .map_err(|e| AppError::GenerationFailed {
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationFailed {
                message: format!("API error {}: {}", status, body),
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            AppError::GenerationFailed {
                message: format!("Failed to parse response: {}", e),
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationFailed {
                message: "Empty response from model".to_string(),
            })?;

        Ok(ChatCompletion {
            content,
            usage: parsed.usage.map(Into::into).unwrap_or_default(),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        debug!(model = %self.model, messages = request.messages.len(), "stream: called");

        let builder = self.http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(&request, true));

        let source = EventSource::new(builder).map_err(|e| AppError::GenerationFailed {
            message: e.to_string(),
        })?;

        let state = StreamState {
            source,
            pending: VecDeque::new(),
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Some((Ok(chunk), Some(state)));
                }

                match state.source.next().await {
                    None => return None,
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if message.data.trim() == "[DONE]" {
                            state.source.close();
                            return None;
                        }
                        match parse_stream_event(&message.data) {
                            Ok(chunks) => state.pending.extend(chunks),
                            Err(e) => {
                                state.source.close();
                                return Some((Err(e), None));
                            }
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) => return None,
                    Some(Err(e)) => {
                        state.source.close();
                        let message = match e {
                            reqwest_eventsource::Error::InvalidStatusCode(status, _) => {
                                format!("API error {}", status)
                            }
                            other => other.to_string(),
                        };
                        return Some((Err(AppError::GenerationFailed { message }), None));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
