//! Cross-protocol section alignment.
//!
//! Two independent nearest-neighbour passes (A→B and B→A) followed by a
//! reconciliation step. Only mutual best matches can pair up; everything else
//! is reported as present on one side only.
use serde::{Deserialize, Serialize};

use protoquery_core::config::AlignmentThresholds;
use protoquery_core::error::Result;
use protoquery_core::types::{AlignmentPair, Chunk, ChunkRef, Classification, ProtocolId};
use protoquery_vector::cosine;

use crate::catalog::{CorpusSnapshot, ProtocolSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub equivalent: usize,
    pub modified: usize,
    pub added_in_a: usize,
    pub added_in_b: usize,
}

impl ComparisonSummary {
    fn count(pairs: &[AlignmentPair]) -> Self {
        let mut s = Self::default();
        for p in pairs {
            match p.classification {
                Classification::Equivalent => s.equivalent += 1,
                Classification::Modified => s.modified += 1,
                Classification::AddedInA => s.added_in_a += 1,
                Classification::AddedInB => s.added_in_b += 1,
            }
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub protocol_a: ProtocolId,
    pub protocol_b: ProtocolId,
    pub generation: u64,
    pub thresholds: AlignmentThresholds,
    pub pairs: Vec<AlignmentPair>,
    pub summary: ComparisonSummary,
}

/// Best match for one chunk: `(ordinal in the other protocol, similarity)`.
type Best = Option<(u32, f32)>;

fn comparable(x: &Chunk, y: &Chunk) -> bool { !(x.is_labeled() && y.is_labeled()) || x.section == y.section }

/// For every chunk of `from`, its most similar comparable chunk of `to`.
/// Equal similarities go to the candidate whose ordinal is closest to the
/// source chunk's, then to the lower ordinal, so repeated text in an
/// identical copy still pairs position by position.
fn nearest(from: &ProtocolSnapshot, to: &ProtocolSnapshot) -> Vec<Best> {
    from.chunks()
        .iter()
        .map(|x| {
            let distance = |ordinal: u32| ordinal.abs_diff(x.ordinal);
            let mut best: Best = None;
            for y in to.chunks().iter().filter(|y| comparable(x, y)) {
                let s = cosine(&x.embedding, &y.embedding);
                let better = match best {
                    None => true,
                    Some((j, b)) => s > b || (s == b && distance(y.ordinal) < distance(j)),
                };
                if better {
                    best = Some((y.ordinal, s));
                }
            }
            best
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct ProtocolAligner {
    thresholds: AlignmentThresholds,
}

impl ProtocolAligner {
    pub fn new(thresholds: AlignmentThresholds) -> Result<Self> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn compare(&self, snapshot: &CorpusSnapshot, a: &ProtocolId, b: &ProtocolId) -> Result<ComparisonReport> {
        let pa = snapshot.require(a)?;
        let pb = snapshot.require(b)?;
        let a_to_b = nearest(pa, pb);
        let b_to_a = nearest(pb, pa);

        let AlignmentThresholds { high, low } = self.thresholds;
        let mut claimed = vec![false; pb.chunks().len()];
        let mut pairs = Vec::with_capacity(pa.chunks().len() + pb.chunks().len());

        for (x, best) in pa.chunks().iter().zip(&a_to_b) {
            let a_ref = Some(x.chunk_ref());
            let pair = match *best {
                Some((j, s)) => {
                    let mutual = b_to_a.get(j as usize).copied().flatten().is_some_and(|(i, _)| i == x.ordinal);
                    let class = if !mutual || s < low {
                        None
                    } else if s >= high {
                        Some(Classification::Equivalent)
                    } else {
                        Some(Classification::Modified)
                    };
                    match class {
                        Some(classification) => {
                            claimed[j as usize] = true;
                            AlignmentPair { a: a_ref, b: Some(ChunkRef::new(b.clone(), j)), classification, similarity: s }
                        }
                        None => AlignmentPair { a: a_ref, b: None, classification: Classification::AddedInA, similarity: s },
                    }
                }
                None => AlignmentPair { a: a_ref, b: None, classification: Classification::AddedInA, similarity: 0.0 },
            };
            pairs.push(pair);
        }

        for (y, best) in pb.chunks().iter().zip(&b_to_a) {
            if !claimed[y.ordinal as usize] {
                pairs.push(AlignmentPair {
                    a: None,
                    b: Some(y.chunk_ref()),
                    classification: Classification::AddedInB,
                    similarity: best.map_or(0.0, |(_, s)| s),
                });
            }
        }

        let summary = ComparisonSummary::count(&pairs);
        tracing::info!(a = %a, b = %b, equivalent = summary.equivalent, modified = summary.modified, added_in_a = summary.added_in_a, added_in_b = summary.added_in_b, "compared protocols");
        Ok(ComparisonReport { protocol_a: a.clone(), protocol_b: b.clone(), generation: snapshot.generation(), thresholds: self.thresholds, pairs, summary })
    }
}
