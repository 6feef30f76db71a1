//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Ranks are 1-based. A chunk missing from a list gets nothing from it.
use std::cmp::Ordering;
use std::collections::HashMap;

use protoquery_core::types::{ChunkRef, RankedResult};

pub fn rrf_contribution(rank: u32, rrf_k: f64) -> f64 { 1.0 / (rrf_k + f64::from(rank)) }

/// Total order over fused results: fused score desc, lexical rank asc
/// (absent last), ordinal asc, protocol id asc.
pub fn total_order(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.fused_score
        .partial_cmp(&a.fused_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.lexical_rank, b.lexical_rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        .then_with(|| a.chunk.protocol_id.cmp(&b.chunk.protocol_id))
}

/// Fuse two ranked lists (best first) into one list sorted by [`total_order`].
pub fn fuse(lexical: &[(ChunkRef, f32)], vector: &[(ChunkRef, f32)], rrf_k: f64) -> Vec<RankedResult> {
    let mut by_chunk: HashMap<&ChunkRef, RankedResult> = HashMap::new();
    let blank = |chunk: &ChunkRef| RankedResult {
        chunk: chunk.clone(),
        fused_score: 0.0,
        lexical_rank: None,
        vector_rank: None,
        lexical_score: None,
        vector_score: None,
    };

    for (i, (chunk, score)) in lexical.iter().enumerate() {
        let rank = i as u32 + 1;
        let entry = by_chunk.entry(chunk).or_insert_with(|| blank(chunk));
        entry.lexical_rank = Some(rank);
        entry.lexical_score = Some(*score);
        entry.fused_score += rrf_contribution(rank, rrf_k);
    }
    for (i, (chunk, score)) in vector.iter().enumerate() {
        let rank = i as u32 + 1;
        let entry = by_chunk.entry(chunk).or_insert_with(|| blank(chunk));
        entry.vector_rank = Some(rank);
        entry.vector_score = Some(*score);
        entry.fused_score += rrf_contribution(rank, rrf_k);
    }

    let mut out: Vec<RankedResult> = by_chunk.into_values().collect();
    out.sort_by(total_order);
    out
}
