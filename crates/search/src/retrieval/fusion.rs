//! Score fusion for the fact and summary indexes
//!
//! Raw cosine similarities from different indexes are not comparable, so
//! each list is rescaled on its own before the lists are merged:
//! - hits below the similarity floor are dropped
//! - survivors are min-max scaled over `[floor, list max]`
//! - the scaled score is multiplied by the index weight

use manualqa_common::store::{IndexName, ScoredRecord};
use std::cmp::Ordering;
use std::collections::HashSet;

/// One candidate after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub index: IndexName,

    /// Similarity as returned by the store
    pub raw: f32,

    /// Normalized, weighted score (0.0 - weight)
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct ScoreFusion {
    /// Raw similarity below which a hit is discarded
    pub floor: f32,

    pub fact_weight: f32,

    pub summary_weight: f32,
}

impl Default for ScoreFusion {
    fn default() -> Self {
        Self {
            floor: 0.2,
            fact_weight: 1.0,
            summary_weight: 0.8,
        }
    }
}

impl ScoreFusion {
    pub fn weight(&self, index: IndexName) -> f32 {
        match index {
            IndexName::AtomicFacts => self.fact_weight,
            IndexName::Summaries => self.summary_weight,
        }
    }

    /// Floor, rescale and weight one index's hits
    pub fn normalize(&self, index: IndexName, hits: Vec<ScoredRecord>) -> Vec<FusedHit> {
        let kept: Vec<ScoredRecord> = hits
            .into_iter()
            .filter(|h| h.score.is_finite() && h.score >= self.floor)
            .collect();

        let max = kept.iter().map(|h| h.score).fold(f32::MIN, f32::max);
        let span = max - self.floor;
        let weight = self.weight(index);

        kept.into_iter()
            .map(|h| {
                let scaled = if span <= f32::EPSILON {
                    1.0
                } else {
                    ((h.score - self.floor) / span).clamp(0.0, 1.0)
                };
                FusedHit {
                    id: h.id,
                    index,
                    raw: h.score,
                    score: scaled * weight,
                }
            })
            .collect()
    }

    /// Merge normalized lists: score descending, facts before summaries,
    /// then identifier. The first occurrence of a record id wins.
    pub fn merge(&self, lists: Vec<Vec<FusedHit>>, limit: usize) -> Vec<FusedHit> {
        let mut all: Vec<FusedHit> = lists.into_iter().flatten().collect();
        all.sort_by(compare_hits);

        let mut seen = HashSet::new();
        all.retain(|h| seen.insert(h.id.clone()));
        all.truncate(limit);
        all
    }
}

fn index_rank(index: IndexName) -> u8 {
    match index {
        IndexName::AtomicFacts => 0,
        IndexName::Summaries => 1,
    }
}

fn compare_hits(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| index_rank(a.index).cmp(&index_rank(b.index)))
        .then_with(|| a.id.cmp(&b.id))
}
