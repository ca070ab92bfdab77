//! Core data model
//!
//! Per-request entities for LexForge. Nothing here outlives a request;
//! the fragment index is the only persistent collaborator.

mod citation;
mod conversation;
mod fragment;
mod overrides;

pub use citation::CitationKey;
pub use conversation::{estimate_tokens, latest_user_message, ChatMessage, Role};
pub use fragment::Fragment;
pub use overrides::{AnswerOverrides, RetrievalMode};
