//! Reciprocal Rank Fusion (RRF) for combining ranked fragment lists
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Is robust to outliers

use lexforge_common::Fragment;
use std::collections::HashMap;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f64,

    /// Weight for keyword results
    pub keyword_weight: f64,

    /// Weight for vector results
    pub vector_weight: f64,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            keyword_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

/// Result of fusion
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub fragment: Fragment,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub rrf_score: f64,
}

impl RRFusion {
    /// Create with custom weights
    pub fn with_weights(keyword_weight: f64, vector_weight: f64) -> Self {
        Self {
            k: 60.0,
            keyword_weight,
            vector_weight,
        }
    }

    /// Fuse two ranked lists, keyed by fragment id
    pub fn fuse(
        &self,
        keyword_results: Vec<Fragment>,
        vector_results: Vec<Fragment>,
        limit: usize,
    ) -> Vec<FusionResult> {
        let mut fused: HashMap<String, (Fragment, Option<usize>, Option<usize>)> = HashMap::new();

        for (rank, fragment) in keyword_results.into_iter().enumerate() {
            fused.insert(fragment.id.clone(), (fragment, Some(rank + 1), None));
        }

        for (rank, fragment) in vector_results.into_iter().enumerate() {
            match fused.get_mut(&fragment.id) {
                Some((_, _, vector_rank)) => *vector_rank = Some(rank + 1),
                None => {
                    fused.insert(fragment.id.clone(), (fragment, None, Some(rank + 1)));
                }
            }
        }

        let mut results: Vec<FusionResult> = fused
            .into_values()
            .map(|(mut fragment, keyword_rank, vector_rank)| {
                let keyword_rrf = keyword_rank
                    .map(|r| self.keyword_weight / (self.k + r as f64))
                    .unwrap_or(0.0);
                let vector_rrf = vector_rank
                    .map(|r| self.vector_weight / (self.k + r as f64))
                    .unwrap_or(0.0);

                let rrf_score = keyword_rrf + vector_rrf;
                fragment.score = rrf_score;

                FusionResult {
                    fragment,
                    keyword_rank,
                    vector_rank,
                    rrf_score,
                }
            })
            .collect();

        // Sort by RRF score descending, id as a stable tiebreak
        results.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.fragment.id.cmp(&b.fragment.id))
        });

        results.truncate(limit);
        results
    }
}
