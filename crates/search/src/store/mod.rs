//! Fragment store client
//!
//! One `FragmentStore` trait with two implementations:
//! - `HttpIndexClient` talks to a remote search service
//! - `MemoryFragmentStore` ranks an in-process index (development and tests)

mod http;
mod memory;
pub mod predicate;

pub use http::HttpIndexClient;
pub use memory::MemoryFragmentStore;

use crate::filter::FilterExpression;
use async_trait::async_trait;
use lexforge_common::config::{AppConfig, SearchBackend};
use lexforge_common::embeddings::Embedder;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::{Fragment, RetrievalMode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Result cap used when a request does not set one
pub const DEFAULT_TOP: usize = 5;

/// Largest result cap a single query may ask for
pub const MAX_TOP: usize = 50;

/// One query against the fragment index
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub mode: RetrievalMode,
    pub semantic_ranking: bool,
    /// Applied by the index before ranking and truncation
    pub filter: Option<FilterExpression>,
    pub top: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: RetrievalMode::default(),
            semantic_ranking: false,
            filter: None,
            top: DEFAULT_TOP,
        }
    }

    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_semantic_ranking(mut self, enabled: bool) -> Self {
        self.semantic_ranking = enabled;
        self
    }

    pub fn with_filter(mut self, filter: Option<FilterExpression>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = top;
        self
    }

    /// Reject blank queries and out-of-range result caps
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(AppError::InvalidQuery {
                message: "query text is empty".to_string(),
            });
        }
        if self.top == 0 || self.top > MAX_TOP {
            return Err(AppError::Validation {
                message: format!("top must be between 1 and {}", MAX_TOP),
                field: Some("top".to_string()),
            });
        }
        Ok(())
    }
}

/// Ranked, filtered access to indexed fragments
#[async_trait]
pub trait FragmentStore: Send + Sync {
    /// At most `request.top` fragments, ordered by descending relevance.
    ///
    /// The filter is applied inside the index, so every returned fragment
    /// satisfies it and the cap counts visible fragments only.
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Fragment>>;

    /// Fetch one fragment by id; `Ok(None)` when it does not exist
    async fn lookup(&self, id: &str) -> Result<Option<Fragment>>;

    /// Backend name for logs and traces
    fn name(&self) -> &str;
}

/// Build the configured store
pub async fn create_store(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn FragmentStore>> {
    match config.search.backend {
        SearchBackend::Http => {
            info!(
                endpoint = %config.search.endpoint,
                index = %config.search.index,
                "Using remote fragment index"
            );
            Ok(Arc::new(HttpIndexClient::new(&config.search, embedder)?))
        }
        SearchBackend::Memory => {
            let store = match &config.search.seed_file {
                Some(path) => MemoryFragmentStore::from_json_file(path, embedder).await?,
                None => MemoryFragmentStore::new(embedder),
            };
            info!(fragments = store.len(), "Using in-memory fragment index");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(SearchRequest::new("limitation period").validate().is_ok());

        let blank = SearchRequest::new("   ").validate().unwrap_err();
        assert!(matches!(blank, AppError::InvalidQuery { .. }));

        let zero = SearchRequest::new("q").with_top(0).validate().unwrap_err();
        assert!(matches!(zero, AppError::Validation { .. }));
        assert!(SearchRequest::new("q").with_top(MAX_TOP + 1).validate().is_err());
        assert!(SearchRequest::new("q").with_top(MAX_TOP).validate().is_ok());
    }
}
