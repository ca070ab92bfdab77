//! Thought-process trace
//!
//! Diagnostic record built alongside every answer. Only privileged callers
//! ever receive it.

use lexforge_common::llm::TokenUsage;
use lexforge_common::{AppError, Fragment, RetrievalMode};
use serde::Serialize;
use std::time::Instant;

/// Category of an absorbed failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    HydrationFailed,
    RetrievalUnavailable,
    InvalidQuery,
    CitationMismatch,
    /// The reasoning capability misbehaved and the planner fell back
    PlanningDegraded,
}

impl WarningKind {
    /// Classify an error that was absorbed rather than returned
    pub fn from_error(err: &AppError) -> Self {
        match err {
            AppError::HydrationFailed { .. } => WarningKind::HydrationFailed,
            AppError::CitationMismatch { .. } => WarningKind::CitationMismatch,
            AppError::InvalidQuery { .. } | AppError::Validation { .. } => WarningKind::InvalidQuery,
            AppError::PlanningFailed { .. } => WarningKind::PlanningDegraded,
            _ => WarningKind::RetrievalUnavailable,
        }
    }
}

/// A condition recorded in the trace without failing the request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineWarning {
    pub kind: WarningKind,
    pub message: String,
    /// Sub-query text, when the warning belongs to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl PipelineWarning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            query: None,
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        Self::new(WarningKind::from_error(err), err.to_string())
    }

    pub fn for_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// One sub-query as it was sent to the fragment store
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedQuery {
    pub index: usize,
    pub query: String,
    pub mode: RetrievalMode,
    pub semantic_ranking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Planning round that proposed it, starting at 1
    pub round: usize,
    pub fragments: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wall-clock per pipeline stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub planning_ms: u64,
    pub retrieval_ms: u64,
    pub normalization_ms: u64,
    pub generation_ms: u64,
}

/// One entry of the thought-process panel
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub title: String,
    pub details: serde_json::Value,
    pub elapsed_ms: u64,
}

impl TraceStep {
    pub fn new(title: impl Into<String>, details: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            title: title.into(),
            details,
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerTrace {
    pub queries: Vec<ExecutedQuery>,
    /// After filtering, before hydration
    pub fragments_considered: Vec<Fragment>,
    pub planning_usage: TokenUsage,
    pub generation_usage: TokenUsage,
    pub timings: StageTimings,
    pub warnings: Vec<PipelineWarning>,
    pub steps: Vec<TraceStep>,
}

impl AnswerTrace {
    pub fn warn(&mut self, warning: PipelineWarning) {
        self.warnings.push(warning);
    }

    pub fn step(&mut self, title: impl Into<String>, details: serde_json::Value, elapsed_ms: u64) {
        self.steps.push(TraceStep::new(title, details, elapsed_ms));
    }

    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &PipelineWarning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// Milliseconds since `start`
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
