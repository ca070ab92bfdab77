//! LexForge Answer Engine
//!
//! Turns a conversation into a grounded, cited answer:
//! - Query planning (single-shot or agentic multi-query)
//! - Citation normalization (hydration, canonical source pages, dedupe)
//! - Streamed answer composition with citation verification
//! - Thought-process trace for privileged callers

pub mod citation;
pub mod composer;
pub mod markers;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod trace;

pub use citation::{CitationNormalizer, Normalized};
pub use composer::{AnswerComposer, ComposeOptions, ComposedAnswer, ComposerEvent};
pub use pipeline::{collect_answer, AnswerEvent, AnswerPipeline, AnswerStream, FinalAnswer, PipelineConfig};
pub use planner::{PlanningStrategy, QueryPlanner, RetrievalResult, RetrievalSettings};
pub use trace::{AnswerTrace, ExecutedQuery, PipelineWarning, WarningKind};
