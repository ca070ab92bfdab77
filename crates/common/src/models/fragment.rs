//! Fragment: a retrievable, citable unit of indexed document content

use super::CitationKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Index key. Several fragments may share one citation.
    pub id: String,

    #[serde(default)]
    pub content: String,

    /// Human-readable document name, e.g. "Practice Direction 3E"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,

    /// Page or subsection identifier, e.g. "PD3E-1.1"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Access groups allowed to see this fragment. Empty means public.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Relevance score in the units of the retrieval mode that produced it
    #[serde(default)]
    pub score: f64,

    /// Semantic ranker score (0-4), present only when semantic ranking ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,

    /// Indices of the sub-queries that returned this fragment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched_queries: Vec<usize>,
}

impl Fragment {
    /// Create a fragment with the citation fields populated
    pub fn new(
        id: impl Into<String>,
        source_file: impl Into<String>,
        source_page: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_file: Some(source_file.into()),
            source_page: Some(source_page.into()),
            ..Default::default()
        }
    }

    pub fn with_subsection(mut self, subsection: impl Into<String>) -> Self {
        self.subsection = Some(subsection.into());
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_storage_url(mut self, url: impl Into<String>) -> Self {
        self.storage_url = Some(url.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// Unrestricted fragments carry no access groups
    pub fn is_public(&self) -> bool {
        self.groups.is_empty()
    }

    /// True when both halves of the citation are known and non-blank
    pub fn has_citation_fields(&self) -> bool {
        non_blank(&self.source_file).is_some() && non_blank(&self.source_page).is_some()
    }

    /// Citation fields, category or storage URL missing.
    ///
    /// `updated` is optional in the index and never triggers a lookup.
    pub fn needs_hydration(&self) -> bool {
        !self.has_citation_fields()
            || non_blank(&self.category).is_none()
            || non_blank(&self.storage_url).is_none()
    }

    /// Canonical citation key, with subsection defaulting to the source page.
    ///
    /// `None` when the source file or page is unknown; such a fragment must
    /// never be cited.
    pub fn citation_key(&self) -> Option<CitationKey> {
        let source_file = non_blank(&self.source_file)?;
        let source_page = non_blank(&self.source_page)?;
        let subsection = non_blank(&self.subsection).unwrap_or(source_page);

        Some(CitationKey::new(subsection, source_page, source_file))
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
