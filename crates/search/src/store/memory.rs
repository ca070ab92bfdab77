//! In-process fragment index
//!
//! Ranks with BM25 for keyword mode, cosine similarity for vector mode and
//! reciprocal rank fusion of the two for hybrid mode. Filters run before
//! ranking, exactly as on the remote service.

use super::predicate::Predicate;
use super::{FragmentStore, SearchRequest};
use crate::fusion::RRFusion;
use async_trait::async_trait;
use lexforge_common::embeddings::{cosine_similarity, Embedder};
use lexforge_common::errors::{AppError, Result};
use lexforge_common::metrics;
use lexforge_common::{Fragment, RetrievalMode};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// BM25 term-frequency saturation
const BM25_K1: f64 = 1.2;
/// BM25 length normalisation
const BM25_B: f64 = 0.75;
/// Upper bound of the semantic ranker scale
const RERANKER_MAX: f64 = 4.0;

struct IndexedFragment {
    fragment: Fragment,
    terms: Vec<String>,
    embedding: Vec<f32>,
}

/// Fault injection for tests
#[derive(Default)]
struct Faults {
    failing_queries: HashSet<String>,
    failing_lookups: HashSet<String>,
    delays: HashMap<String, Duration>,
}

pub struct MemoryFragmentStore {
    embedder: Arc<dyn Embedder>,
    docs: RwLock<Vec<IndexedFragment>>,
    faults: RwLock<Faults>,
    unavailable: AtomicBool,
    search_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    fusion: RRFusion,
}

impl MemoryFragmentStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            docs: RwLock::new(Vec::new()),
            faults: RwLock::new(Faults::default()),
            unavailable: AtomicBool::new(false),
            search_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            fusion: RRFusion::default(),
        }
    }

    /// Load a JSON array of fragments
    pub async fn from_json_file(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| AppError::Configuration {
            message: format!("cannot read seed file {}: {}", path, e),
        })?;
        let fragments: Vec<Fragment> = serde_json::from_str(&raw).map_err(|e| {
            AppError::Configuration {
                message: format!("invalid seed file {}: {}", path, e),
            }
        })?;

        let store = Self::new(embedder);
        store.insert_many(fragments).await?;
        Ok(store)
    }

    /// Index fragments, embedding their content
    pub async fn insert_many(&self, fragments: Vec<Fragment>) -> Result<()> {
        let texts: Vec<String> = fragments.iter().map(|f| f.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let mut docs = write(&self.docs);
        for (fragment, embedding) in fragments.into_iter().zip(embeddings) {
            let terms = terms(&fragment.content);
            docs.push(IndexedFragment { fragment, terms, embedding });
        }
        Ok(())
    }

    pub async fn insert(&self, fragment: Fragment) -> Result<()> {
        self.insert_many(vec![fragment]).await
    }

    pub fn len(&self) -> usize {
        read(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Searches whose text equals `query` fail as unavailable
    pub fn fail_query(&self, query: impl Into<String>) {
        write(&self.faults).failing_queries.insert(query.into());
    }

    /// Lookups of `id` fail as unavailable
    pub fn fail_lookup(&self, id: impl Into<String>) {
        write(&self.faults).failing_lookups.insert(id.into());
    }

    /// Searches whose text equals `query` wait before answering
    pub fn delay_query(&self, query: impl Into<String>, delay: Duration) {
        write(&self.faults).delays.insert(query.into(), delay);
    }

    /// Every call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::RetrievalUnavailable {
                message: "index is offline".to_string(),
            });
        }
        Ok(())
    }

    /// Rank the visible documents for one request
    fn rank(
        &self,
        request: &SearchRequest,
        predicate: Option<&Predicate>,
        query_vector: Option<&[f32]>,
    ) -> Vec<Fragment> {
        let docs = read(&self.docs);
        let visible: Vec<&IndexedFragment> = docs
            .iter()
            .filter(|d| predicate.map_or(true, |p| p.matches(&d.fragment)))
            .collect();
        let query_terms = terms(&request.query);

        let mut ranked = match (request.mode, query_vector) {
            (RetrievalMode::Keyword, _) | (_, None) => bm25(&visible, &query_terms),
            (RetrievalMode::Vector, Some(vector)) => by_similarity(&visible, vector),
            (RetrievalMode::Hybrid, Some(vector)) => {
                let keyword = bm25(&visible, &query_terms);
                let semantic = by_similarity(&visible, vector);
                let limit = keyword.len() + semantic.len();
                self.fusion
                    .fuse(keyword, semantic, limit)
                    .into_iter()
                    .map(|r| r.fragment)
                    .collect()
            }
        };

        if request.semantic_ranking {
            rerank(&mut ranked, &query_terms);
        }

        ranked.truncate(request.top);
        ranked
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lowercase alphanumeric terms longer than two characters
fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn bm25(docs: &[&IndexedFragment], query_terms: &[String]) -> Vec<Fragment> {
    if docs.is_empty() || query_terms.is_empty() {
        return Vec::new();
    }

    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.terms.len()).sum::<usize>() as f64 / n;
    let unique: HashSet<&String> = query_terms.iter().collect();

    let idf: HashMap<&String, f64> = unique
        .iter()
        .map(|term| {
            let df = docs.iter().filter(|d| d.terms.contains(*term)).count() as f64;
            (*term, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
        })
        .collect();

    let mut scored: Vec<Fragment> = docs
        .iter()
        .filter_map(|doc| {
            let len = doc.terms.len() as f64;
            let score: f64 = unique
                .iter()
                .map(|term| {
                    let tf = doc.terms.iter().filter(|t| t == term).count() as f64;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0));
                    idf[term] * tf * (BM25_K1 + 1.0) / (tf + norm)
                })
                .sum();
            (score > 0.0).then(|| doc.fragment.clone().with_score(score))
        })
        .collect();

    sort_desc(&mut scored, |f| f.score);
    scored
}

fn by_similarity(docs: &[&IndexedFragment], vector: &[f32]) -> Vec<Fragment> {
    let mut scored: Vec<Fragment> = docs
        .iter()
        .filter_map(|doc| {
            let similarity = cosine_similarity(&doc.embedding, vector) as f64;
            (similarity > 0.0).then(|| doc.fragment.clone().with_score(similarity))
        })
        .collect();

    sort_desc(&mut scored, |f| f.score);
    scored
}

/// Score 0-4 by the share of query terms each fragment contains
fn rerank(fragments: &mut [Fragment], query_terms: &[String]) {
    let unique: HashSet<&String> = query_terms.iter().collect();
    for fragment in fragments.iter_mut() {
        let content = terms(&fragment.content);
        let hits = unique.iter().filter(|t| content.contains(**t)).count();
        let share = if unique.is_empty() { 0.0 } else { hits as f64 / unique.len() as f64 };
        fragment.reranker_score = Some(RERANKER_MAX * share);
    }
    sort_desc(fragments, |f| f.reranker_score.unwrap_or_default());
}

/// Stable descending sort; ties keep index order
fn sort_desc(fragments: &mut [Fragment], key: impl Fn(&Fragment) -> f64) {
    fragments.sort_by(|a, b| {
        key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[async_trait]
impl FragmentStore for MemoryFragmentStore {
    #[instrument(skip(self, request), fields(mode = %request.mode, top = request.top))]
    async fn search(&self, request: &SearchRequest) -> Result<Vec<Fragment>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        request.validate()?;
        let start = Instant::now();

        let (delay, failing) = {
            let faults = read(&self.faults);
            (
                faults.delays.get(&request.query).copied(),
                faults.failing_queries.contains(&request.query),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = self.check_available() {
            metrics::record_search(start.elapsed().as_secs_f64(), request.mode.as_str(), false);
            return Err(e);
        }
        if failing {
            metrics::record_search(start.elapsed().as_secs_f64(), request.mode.as_str(), false);
            return Err(AppError::RetrievalUnavailable {
                message: format!("search failed for '{}'", request.query),
            });
        }

        let predicate = request
            .filter
            .as_ref()
            .map(|f| Predicate::parse(f.as_str()))
            .transpose()
            .map_err(|e| AppError::InvalidQuery {
                message: format!("invalid filter: {}", e),
            })?;

        let query_vector = if request.mode.uses_vectors() {
            let vector = self.embedder.embed(&request.query).await.map_err(|e| {
                AppError::RetrievalUnavailable {
                    message: format!("query embedding failed: {}", e),
                }
            })?;
            Some(vector)
        } else {
            None
        };

        let fragments = self.rank(request, predicate.as_ref(), query_vector.as_deref());
        metrics::record_search(start.elapsed().as_secs_f64(), request.mode.as_str(), true);
        debug!(hits = fragments.len(), "search: complete");
        Ok(fragments)
    }

    async fn lookup(&self, id: &str) -> Result<Option<Fragment>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if read(&self.faults).failing_lookups.contains(id) {
            return Err(AppError::RetrievalUnavailable {
                message: format!("lookup failed for '{}'", id),
            });
        }

        Ok(read(&self.docs)
            .iter()
            .find(|d| d.fragment.id == id)
            .map(|d| d.fragment.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
