//! Scripted generation capability
//!
//! Replays queued replies in order. Used by tests to drive the planner and
//! composer deterministically, and by the gateway as an offline stand-in
//! when no API key is configured.

use super::{ChatChunk, ChatCompletion, ChatModel, ChatRequest, ChatStream, TokenUsage};
use crate::errors::{AppError, Result};
use crate::models::Role;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One canned reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Whole text; streamed as a single delta
    Text(String),
    /// Streamed as the given deltas
    Chunks(Vec<String>),
    /// Deltas followed by a mid-stream failure
    ChunksThenFail(Vec<String>, String),
    /// Deltas, then the stream never finishes
    ChunksThenHang(Vec<String>),
    /// The call itself fails
    Fail(String),
}

pub struct ScriptedChatModel {
    completions: Mutex<VecDeque<ScriptedReply>>,
    streams: Mutex<VecDeque<ScriptedReply>>,
    usage: TokenUsage,
    offline: bool,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
    requests: Mutex<Vec<ChatRequest>>,
}

/// Decrements the open-stream count when the stream is dropped
struct OpenStreamGuard(Arc<AtomicUsize>);

impl Drop for OpenStreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedChatModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChatModel {
    /// Empty script; unscripted calls fail
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            usage: TokenUsage::new(100, 20),
            offline: false,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            open_streams: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Unscripted calls get an empty plan or an answer citing the first source
    pub fn offline() -> Self {
        Self { offline: true, ..Self::new() }
    }

    /// Queue a reply for the next `complete` call
    pub fn push_completion(&self, reply: ScriptedReply) -> &Self {
        lock(&self.completions).push_back(reply);
        self
    }

    /// Queue a reply for the next `stream` call
    pub fn push_stream(&self, reply: ScriptedReply) -> &Self {
        lock(&self.streams).push_back(reply);
        self
    }

    /// Usage reported by every call
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    fn offline_reply(&self, request: &ChatRequest) -> ScriptedReply {
        if request.json_response {
            return ScriptedReply::Text(r#"{"queries": []}"#.to_string());
        }

        let first_source = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().find(|l| l.starts_with('[')))
            .and_then(|line| line.split_once("]:").map(|(key, _)| format!("{}]", key)));

        match first_source {
            Some(marker) => ScriptedReply::Text(format!(
                "Offline mode: the most relevant source is {}.",
                marker
            )),
            None => ScriptedReply::Text("Offline mode: no model is configured.".to_string()),
        }
    }

    fn next_reply(&self, queue: &Mutex<VecDeque<ScriptedReply>>, request: &ChatRequest) -> Result<ScriptedReply> {
        match lock(queue).pop_front() {
            Some(reply) => Ok(reply),
            None if self.offline => Ok(self.offline_reply(request)),
            None => Err(AppError::GenerationFailed {
                message: "no scripted reply queued".to_string(),
            }),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply(&self.completions, &request)?;
        lock(&self.requests).push(request);

        let content = match reply {
            ScriptedReply::Text(text) => text,
            ScriptedReply::Chunks(chunks)
            | ScriptedReply::ChunksThenHang(chunks) => chunks.concat(),
            ScriptedReply::ChunksThenFail(_, message) | ScriptedReply::Fail(message) => {
                return Err(AppError::GenerationFailed { message });
            }
        };

        Ok(ChatCompletion { content, usage: self.usage })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.next_reply(&self.streams, &request)?;
        lock(&self.requests).push(request);

        let (chunks, tail) = match reply {
            ScriptedReply::Fail(message) => return Err(AppError::GenerationFailed { message }),
            ScriptedReply::Text(text) => (vec![text], Tail::Finish),
            ScriptedReply::Chunks(chunks) => (chunks, Tail::Finish),
            ScriptedReply::ChunksThenFail(chunks, message) => (chunks, Tail::Fail(message)),
            ScriptedReply::ChunksThenHang(chunks) => (chunks, Tail::Hang),
        };

        let usage = self.usage;
        let head = futures::stream::iter(
            chunks.into_iter().map(|c| Ok(ChatChunk::Delta(c))).collect::<Vec<_>>(),
        );
        let tail = match tail {
            Tail::Finish => futures::stream::iter(vec![Ok(ChatChunk::Usage(usage))]).boxed(),
            Tail::Fail(message) => {
                futures::stream::iter(vec![Err(AppError::GenerationFailed { message })]).boxed()
            }
            Tail::Hang => futures::stream::pending().boxed(),
        };

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = OpenStreamGuard(self.open_streams.clone());

        Ok(head
            .chain(tail)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

enum Tail {
    Finish,
    Fail(String),
    Hang,
}
