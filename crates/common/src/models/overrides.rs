//! Caller-supplied knobs for a single answer request

use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval mode understood by the fragment index
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Lexical matching only
    Keyword,
    /// Embedding similarity only
    Vector,
    /// Keyword and vector, fused by the index
    #[default]
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Keyword => "keyword",
            RetrievalMode::Vector => "vector",
            RetrievalMode::Hybrid => "hybrid",
        }
    }

    pub fn uses_text(&self) -> bool {
        matches!(self, RetrievalMode::Keyword | RetrievalMode::Hybrid)
    }

    pub fn uses_vectors(&self) -> bool {
        matches!(self, RetrievalMode::Vector | RetrievalMode::Hybrid)
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request overrides. Unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnswerOverrides {
    pub retrieval_mode: Option<RetrievalMode>,
    pub semantic_ranking: Option<bool>,
    pub top: Option<usize>,
    pub agentic: Option<bool>,
    pub max_subqueries: Option<usize>,

    /// Ask for the thought-process trace. Honoured for privileged callers only.
    pub include_trace: bool,

    pub include_category: Option<String>,
    pub exclude_category: Option<String>,
    pub minimum_search_score: Option<f64>,
    pub minimum_reranker_score: Option<f64>,

    pub temperature: Option<f32>,
    pub seed: Option<u64>,
    pub suggest_followup_questions: bool,
}
