//! Merging the lexical and semantic ranked lists into one ranking.
//!
//! Two strategies:
//! - **Weighted**: min-max normalize each score column, then blend with `alpha`.
//! - **RRF** (Reciprocal Rank Fusion): sum `1 / (k + rank)` over the lists a
//!   document appears in.
//!
//! Both are pure functions of their two input lists.

use crate::bm25::LexicalHit;
use crate::document::DocId;
use crate::semantic::SemanticHit;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedScore {
    pub doc_id: DocId,
    pub hybrid_score: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RrfScore {
    pub doc_id: DocId,
    pub rrf_score: f64,
    /// 1-based position in the lexical list, if present there.
    pub keyword_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// Min-max normalize into `[0, 1]`. A constant column normalizes to all zeros.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else { return Vec::new() };
    let max = scores.iter().copied().fold(min, f64::max);
    let range = max - min;
    if range == 0.0 {
        return vec![0.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / range).collect()
}

pub fn hybrid_score(keyword_score: f64, semantic_score: f64, alpha: f64) -> f64 {
    alpha * keyword_score + (1.0 - alpha) * semantic_score
}

pub fn rrf_score(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

#[derive(Default)]
struct Slot {
    keyword: f64,
    semantic: f64,
    keyword_rank: Option<usize>,
    semantic_rank: Option<usize>,
}

/// Collect both lists into per-document slots, lexical entries first.
/// Only the first occurrence of an id within a list counts.
fn merge(lexical: &[LexicalHit], semantic: &[SemanticHit]) -> (Vec<DocId>, HashMap<DocId, Slot>) {
    let mut order = Vec::with_capacity(lexical.len() + semantic.len());
    let mut slots: HashMap<DocId, Slot> = HashMap::with_capacity(order.capacity());
    let kw_norm = normalize_scores(&lexical.iter().map(|h| h.score).collect::<Vec<_>>());
    let sem_norm = normalize_scores(&semantic.iter().map(|h| h.score).collect::<Vec<_>>());

    for (rank, (hit, norm)) in lexical.iter().zip(kw_norm).enumerate() {
        let slot = slots.entry(hit.doc_id).or_insert_with(|| {
            order.push(hit.doc_id);
            Slot::default()
        });
        if slot.keyword_rank.is_none() {
            slot.keyword = norm;
            slot.keyword_rank = Some(rank + 1);
        }
    }
    for (rank, (hit, norm)) in semantic.iter().zip(sem_norm).enumerate() {
        let slot = slots.entry(hit.doc_id).or_insert_with(|| {
            order.push(hit.doc_id);
            Slot::default()
        });
        if slot.semantic_rank.is_none() {
            slot.semantic = norm;
            slot.semantic_rank = Some(rank + 1);
        }
    }
    (order, slots)
}

fn by_rank(a: Option<usize>, b: Option<usize>) -> Ordering {
    a.unwrap_or(usize::MAX).cmp(&b.unwrap_or(usize::MAX))
}

/// Weighted blend of normalized scores, best first, truncated to `limit`.
///
/// A document missing from one list gets 0 on that side. Equal blended scores
/// are ordered by rank in the list carrying more weight, so `alpha = 1` keeps
/// lexical order and `alpha = 0` keeps semantic order.
pub fn weighted_fusion(lexical: &[LexicalHit], semantic: &[SemanticHit], alpha: f64, limit: usize) -> Vec<WeightedScore> {
    let (order, slots) = merge(lexical, semantic);
    let keyword_leads = alpha >= 0.5;
    let mut fused: Vec<(WeightedScore, Option<usize>)> = order
        .into_iter()
        .filter_map(|id| slots.get(&id).map(|s| (id, s)))
        .map(|(doc_id, s)| {
            let lead_rank = if keyword_leads { s.keyword_rank } else { s.semantic_rank };
            let score = WeightedScore {
                doc_id,
                hybrid_score: hybrid_score(s.keyword, s.semantic, alpha),
                keyword_score: s.keyword,
                semantic_score: s.semantic,
            };
            (score, lead_rank)
        })
        .collect();
    fused.sort_by(|a, b| b.0.hybrid_score.total_cmp(&a.0.hybrid_score).then_with(|| by_rank(a.1, b.1)));
    fused.into_iter().take(limit).map(|(s, _)| s).collect()
}

/// Reciprocal Rank Fusion, best first, truncated to `limit`.
pub fn rrf_fusion(lexical: &[LexicalHit], semantic: &[SemanticHit], k: f64, limit: usize) -> Vec<RrfScore> {
    let (order, slots) = merge(lexical, semantic);
    let mut fused: Vec<RrfScore> = order
        .into_iter()
        .filter_map(|id| slots.get(&id).map(|s| (id, s)))
        .map(|(doc_id, s)| RrfScore {
            doc_id,
            rrf_score: [s.keyword_rank, s.semantic_rank].into_iter().flatten().map(|r| rrf_score(r, k)).sum(),
            keyword_rank: s.keyword_rank,
            semantic_rank: s.semantic_rank,
        })
        .collect();
    fused.sort_by(|a, b| b.rrf_score.total_cmp(&a.rrf_score));
    fused.truncate(limit);
    fused
}
