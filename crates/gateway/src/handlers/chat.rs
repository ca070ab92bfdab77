//! Chat handlers
//!
//! `POST /v2/chat` answers in one JSON body. `POST /v2/chat/stream` writes
//! newline-delimited JSON: `delta` records as text arrives, then a single
//! `completed` or `error` record. A client that disconnects drops the body
//! stream and with it the in-flight generation.

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{self, Stream};
use futures::StreamExt;
use lexforge_common::{
    auth::CallerIdentity,
    config::MAX_SUBQUERIES_HARD_LIMIT,
    errors::{AppError, ErrorDetails, ErrorResponse, Result},
    models::AnswerOverrides,
    ChatMessage,
};
use lexforge_context::{collect_answer, AnswerEvent, AnswerStream, FinalAnswer};
use lexforge_search::MAX_TOP;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use crate::AppState;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 200, message = "messages must not be empty"))]
    pub messages: Vec<ChatMessage>,

    #[serde(default)]
    #[validate(custom(function = "validate_overrides"))]
    pub overrides: AnswerOverrides,
}

fn validate_overrides(overrides: &AnswerOverrides) -> std::result::Result<(), ValidationError> {
    if overrides.top.is_some_and(|top| top == 0 || top > MAX_TOP) {
        return Err(ValidationError::new("top_out_of_range"));
    }
    if overrides
        .max_subqueries
        .is_some_and(|k| k == 0 || k > MAX_SUBQUERIES_HARD_LIMIT)
    {
        return Err(ValidationError::new("max_subqueries_out_of_range"));
    }
    Ok(())
}

impl ChatRequest {
    fn check(&self) -> Result<()> {
        self.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: e.field_errors().keys().next().map(|k| k.to_string()),
        })
    }
}

/// One NDJSON record
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    Delta { text: String },
    Completed(FinalAnswer),
    Error(ErrorDetails),
}

impl StreamLine {
    fn error(err: &AppError) -> Self {
        StreamLine::Error(ErrorResponse::from_error(err).error)
    }

    fn encode(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"error","code":"SERIALIZATION_ERROR","message":"{}","retryable":false}}"#,
                e.to_string().replace('"', "'")
            )
        });
        line.push('\n');
        line
    }
}

/// Answer in a single JSON body
pub async fn chat(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<ChatRequest>,
) -> Result<Json<FinalAnswer>> {
    request.check()?;
    info!(
        request_id = %caller.request_id,
        turns = request.messages.len(),
        groups = caller.groups.len(),
        "Chat request"
    );

    let seconds = state.config.server.request_timeout_secs;
    let deadline = Instant::now() + state.config.request_timeout();
    let answer = timeout_at(deadline, async {
        let events = state
            .pipeline
            .answer(&caller, request.messages, request.overrides)
            .await?;
        collect_answer(events).await
    })
    .await
    .map_err(|_| AppError::Timeout { seconds })??;

    Ok(Json(answer))
}

/// Answer as newline-delimited JSON
pub async fn chat_stream(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    request.check()?;
    info!(
        request_id = %caller.request_id,
        turns = request.messages.len(),
        groups = caller.groups.len(),
        "Streaming chat request"
    );

    let seconds = state.config.server.request_timeout_secs;
    let deadline = Instant::now() + state.config.request_timeout();
    let events = timeout_at(
        deadline,
        state.pipeline.answer(&caller, request.messages, request.overrides),
    )
    .await
    .map_err(|_| AppError::Timeout { seconds })??;

    let body = Body::from_stream(ndjson_lines(events, deadline, seconds));
    Ok(([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], body).into_response())
}

/// Encode answer events until completion, failure or the deadline
fn ndjson_lines(
    events: AnswerStream,
    deadline: Instant,
    seconds: u64,
) -> impl Stream<Item = std::result::Result<String, Infallible>> + Send + 'static {
    stream::unfold(Some(events), move |state| async move {
        let mut events = state?;
        let (line, last) = match timeout_at(deadline, events.next()).await {
            Ok(None) => return None,
            Ok(Some(Ok(AnswerEvent::Delta(text)))) => (StreamLine::Delta { text }, false),
            Ok(Some(Ok(AnswerEvent::Completed(answer)))) => (StreamLine::Completed(*answer), true),
            Ok(Some(Err(err))) => {
                warn!(error = %err, "Answer stream failed");
                (StreamLine::error(&err), true)
            }
            Err(_) => {
                warn!(seconds, "Answer stream exceeded the request timeout");
                (StreamLine::error(&AppError::Timeout { seconds }), true)
            }
        };
        let next = if last { None } else { Some(events) };
        Some((Ok(line.encode()), next))
    })
}
