//! Citation normalizer
//!
//! Turns raw retrieval hits into citable fragments:
//! 1. hydrate fragments that came back as bare references
//! 2. canonicalize `sourcePage` / `subsection`
//! 3. deduplicate by citation identity, highest score wins

use super::key::split_source_page;
use crate::trace::PipelineWarning;
use futures::future::join_all;
use lexforge_common::errors::{AppError, Result};
use lexforge_common::metrics;
use lexforge_common::Fragment;
use lexforge_search::FragmentStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Output of one normalization pass
#[derive(Debug, Default)]
pub struct Normalized {
    /// First-seen order, unique by citation identity
    pub fragments: Vec<Fragment>,
    pub warnings: Vec<PipelineWarning>,
    /// Fragments dropped because hydration failed
    pub dropped: usize,
    /// Duplicates folded into an earlier entry
    pub merged: usize,
}

pub struct CitationNormalizer {
    store: Arc<dyn FragmentStore>,
}

impl CitationNormalizer {
    pub fn new(store: Arc<dyn FragmentStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub async fn normalize(&self, fragments: Vec<Fragment>) -> Normalized {
        let hydrations = fragments.into_iter().map(|fragment| async move {
            if fragment.needs_hydration() {
                self.hydrate(fragment).await
            } else {
                Ok(fragment)
            }
        });

        let mut warnings = Vec::new();
        let mut complete = Vec::new();
        for result in join_all(hydrations).await {
            match result {
                Ok(fragment) => complete.push(canonicalize(fragment)),
                Err(err) => {
                    warn!(error = %err, "Dropping fragment that could not be hydrated");
                    warnings.push(PipelineWarning::from_error(&err));
                }
            }
        }

        let dropped = warnings.len();
        metrics::record_hydration_failures(dropped);

        let (fragments, merged) = dedupe(complete);
        debug!(kept = fragments.len(), dropped, merged, "normalize: complete");

        Normalized {
            fragments,
            warnings,
            dropped,
            merged,
        }
    }

    /// Fill missing fields from the full record in the index.
    ///
    /// A failed lookup only drops the fragment when its citation is incomplete.
    async fn hydrate(&self, fragment: Fragment) -> Result<Fragment> {
        let failed = |message: String| AppError::HydrationFailed {
            id: fragment.id.clone(),
            message,
        };

        let record = match self.store.lookup(&fragment.id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => None,
            Err(e) if fragment.has_citation_fields() => {
                debug!(id = %fragment.id, error = %e, "Metadata lookup failed, keeping citable fragment");
                None
            }
            Err(e) => return Err(failed(e.to_string())),
        };
        let Some(record) = record else {
            if fragment.has_citation_fields() {
                return Ok(fragment);
            }
            return Err(failed("not found in index".to_string()));
        };

        let hydrated = merge_record(fragment.clone(), record);
        if !hydrated.has_citation_fields() {
            return Err(failed("record has no source file or page".to_string()));
        }
        Ok(hydrated)
    }
}

/// Take metadata from `record`, keep the retrieval-time view from `hit`
fn merge_record(hit: Fragment, record: Fragment) -> Fragment {
    Fragment {
        id: hit.id,
        content: if hit.content.trim().is_empty() { record.content } else { hit.content },
        source_file: hit.source_file.or(record.source_file),
        source_page: hit.source_page.or(record.source_page),
        subsection: hit.subsection.or(record.subsection),
        category: hit.category.or(record.category),
        groups: if hit.groups.is_empty() { record.groups } else { hit.groups },
        score: hit.score,
        reranker_score: hit.reranker_score,
        storage_url: hit.storage_url.or(record.storage_url),
        updated: hit.updated.or(record.updated),
        matched_queries: hit.matched_queries,
    }
}

/// Populate `subsection`, splitting it out of `sourcePage` when encoded there.
///
/// An explicit subsection wins. It is also stripped from `sourcePage` when
/// the page still ends in that same suffix, so hydrated and split forms of
/// one page share a key.
pub fn canonicalize(mut fragment: Fragment) -> Fragment {
    let Some(page) = fragment.source_page.as_deref() else {
        return fragment;
    };
    let (stem, sub) = split_source_page(page);

    let explicit = fragment
        .subsection
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    match (explicit, sub) {
        (Some(explicit), Some(sub)) if explicit == sub => fragment.source_page = Some(stem),
        (Some(_), _) => {}
        (None, Some(sub)) => {
            fragment.source_page = Some(stem);
            fragment.subsection = Some(sub);
        }
        (None, None) => fragment.subsection = Some(stem),
    }
    fragment
}

/// Collapse fragments sharing a citation identity.
///
/// The higher score wins and equal scores keep the earlier instance. The
/// surviving entry sits at the first-seen position and carries the union of
/// both sides' `matched_queries`. Returns the number of folded duplicates.
pub fn dedupe(fragments: Vec<Fragment>) -> (Vec<Fragment>, usize) {
    let mut out: Vec<Fragment> = Vec::with_capacity(fragments.len());
    let mut positions: HashMap<(String, String, String), usize> = HashMap::new();
    let mut merged = 0;

    for fragment in fragments {
        let Some(key) = fragment.citation_key() else {
            continue;
        };
        let identity = (key.source_file, key.source_page, key.subsection);

        match positions.get(&identity).copied() {
            Some(pos) => {
                merged += 1;
                let existing = &mut out[pos];
                let mut queries = std::mem::take(&mut existing.matched_queries);
                queries.extend(fragment.matched_queries.iter().copied());
                queries.sort_unstable();
                queries.dedup();

                if fragment.score > existing.score {
                    *existing = fragment;
                }
                existing.matched_queries = queries;
            }
            None => {
                positions.insert(identity, out.len());
                out.push(fragment);
            }
        }
    }

    (out, merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexforge_common::embeddings::MockEmbedder;
    use lexforge_search::MemoryFragmentStore;

    fn hit(id: &str, file: &str, page: &str, score: f64, query: usize) -> Fragment {
        let mut f = Fragment::new(id, file, page, format!("content of {}", id))
            .with_category("Rules")
            .with_storage_url(format!("https://docs.example/{}.pdf", id))
            .with_score(score);
        f.matched_queries = vec![query];
        f
    }

    #[test]
    fn test_canonicalize_splits_page() {
        let f = canonicalize(Fragment::new("1", "Practice Direction 3E", "PD3E-1.1", "text"));
        assert_eq!(f.source_page.as_deref(), Some("PD3E"));
        assert_eq!(f.subsection.as_deref(), Some("1.1"));

        let plain = canonicalize(Fragment::new("2", "CPR Part 15", "15.4", "text"));
        assert_eq!(plain.subsection.as_deref(), Some("15.4"));
        assert_eq!(plain.source_page.as_deref(), Some("15.4"));

        let explicit = Fragment::new("3", "CPR Part 15", "PD3E-1.1", "text").with_subsection("a");
        assert_eq!(canonicalize(explicit.clone()), explicit);

        let suffixed = canonicalize(
            Fragment::new("4", "Practice Direction 3E", "PD3E-1.1", "text").with_subsection("1.1"),
        );
        assert_eq!(suffixed.source_page.as_deref(), Some("PD3E"));
        assert_eq!(suffixed.subsection.as_deref(), Some("1.1"));
        assert_eq!(canonicalize(suffixed.clone()), suffixed);
    }

    #[test]
    fn test_dedupe_highest_score_first_position() {
        let fragments = vec![
            hit("a", "CPR Part 15", "15.4", 0.6, 1),
            hit("b", "CPR Part 7", "7.2", 0.5, 0),
            hit("c", "CPR Part 15", "15.4", 0.8, 0),
        ];

        let (out, merged) = dedupe(fragments);
        assert_eq!(merged, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "c");
        assert_eq!(out[0].score, 0.8);
        assert_eq!(out[0].matched_queries, vec![0, 1]);
        assert_eq!(out[1].id, "b");
    }

    #[test]
    fn test_dedupe_tie_keeps_first_seen() {
        let (out, _) = dedupe(vec![
            hit("first", "CPR Part 15", "15.4", 0.7, 0),
            hit("second", "CPR Part 15", "15.4", 0.7, 1),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "first");
    }

    #[tokio::test]
    async fn test_hydration_and_drop() {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(16))));
        store
            .insert(
                Fragment::new("pd3e-1", "Practice Direction 3E", "PD3E-1.1", "Costs budgets...")
                    .with_category("Practice Direction"),
            )
            .await
            .unwrap();
        store.fail_lookup("flaky");

        let bare = |id: &str| Fragment {
            id: id.to_string(),
            score: 0.9,
            ..Default::default()
        };
        let normalizer = CitationNormalizer::new(store.clone());
        let result = normalizer
            .normalize(vec![bare("pd3e-1"), bare("missing"), bare("flaky")])
            .await;

        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.dropped, 2);
        assert_eq!(result.warnings.len(), 2);
        let f = &result.fragments[0];
        assert_eq!(f.source_file.as_deref(), Some("Practice Direction 3E"));
        assert_eq!(f.source_page.as_deref(), Some("PD3E"));
        assert_eq!(f.subsection.as_deref(), Some("1.1"));
        assert_eq!(f.score, 0.9);
        assert_eq!(f.content, "Costs budgets...");
        assert_eq!(store.lookup_calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_metadata_is_hydrated() {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(16))));
        store
            .insert(
                Fragment::new("cpr-15-4", "CPR Part 15", "15.4", "The period for filing a defence...")
                    .with_category("Civil Procedure Rules")
                    .with_storage_url("https://docs.example/cpr-15.pdf"),
            )
            .await
            .unwrap();
        store.fail_lookup("flaky");

        let partial = Fragment::new("cpr-15-4", "CPR Part 15", "15.4", "The period for filing a defence...")
            .with_score(0.8);
        let unreachable = Fragment::new("flaky", "CPR Part 7", "7.2", "Claim forms...").with_score(0.4);

        let normalizer = CitationNormalizer::new(store.clone());
        let result = normalizer.normalize(vec![partial, unreachable]).await;

        assert_eq!(result.fragments.len(), 2);
        assert_eq!(result.dropped, 0);
        assert_eq!(result.fragments[0].category.as_deref(), Some("Civil Procedure Rules"));
        assert_eq!(
            result.fragments[0].storage_url.as_deref(),
            Some("https://docs.example/cpr-15.pdf")
        );
        assert_eq!(result.fragments[1].id, "flaky");
        assert!(result.fragments[1].category.is_none());
        assert_eq!(store.lookup_calls(), 2);
    }

    #[tokio::test]
    async fn test_hydrated_and_split_forms_share_a_key() {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(16))));
        store
            .insert(
                Fragment::new("pd3e-1", "Practice Direction 3E", "PD3E-1.1", "Costs budgets...")
                    .with_subsection("1.1"),
            )
            .await
            .unwrap();

        let bare = Fragment {
            id: "pd3e-1".to_string(),
            source_page: Some("PD3E-1.1".to_string()),
            score: 0.7,
            ..Default::default()
        };
        let full = hit("pd3e-1-copy", "Practice Direction 3E", "PD3E-1.1", 0.5, 1);

        let normalizer = CitationNormalizer::new(store.clone());
        let result = normalizer.normalize(vec![bare, full]).await;

        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.merged, 1);
        let key = result.fragments[0].citation_key().unwrap();
        assert_eq!(key.to_string(), "[1.1, PD3E, Practice Direction 3E]");
        assert_eq!(result.fragments[0].score, 0.7);
    }

    #[tokio::test]
    async fn test_normalize_is_idempotent() {
        let store = Arc::new(MemoryFragmentStore::new(Arc::new(MockEmbedder::new(16))));
        let normalizer = CitationNormalizer::new(store.clone());
        let input = vec![
            hit("a", "Practice Direction 3E", "PD3E-1.1", 0.4, 0),
            hit("b", "CPR Part 15", "15.4", 0.9, 0),
            hit("c", "Practice Direction 3E", "PD3E-1.1", 0.5, 1),
        ];

        let once = normalizer.normalize(input).await.fragments;
        let twice = normalizer.normalize(once.clone()).await.fragments;
        assert_eq!(once, twice);
        assert_eq!(store.lookup_calls(), 0);
    }
}
