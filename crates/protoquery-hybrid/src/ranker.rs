use std::cmp::Ordering;
use std::collections::BTreeSet;

use protoquery_core::config::RankingConfig;
use protoquery_core::error::{Error, Result};
use protoquery_core::types::{ChunkRef, ProtocolId, RankedResult};
use protoquery_text::{Bm25Params, Bm25Scorer};

use crate::catalog::CorpusSnapshot;
use crate::fusion::fuse;

/// Where a ranking may look: protocols, plus optional section labels.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub protocols: &'a [ProtocolId],
    /// Empty means every section.
    pub sections: &'a [String],
}

impl<'a> Scope<'a> {
    pub fn protocols(protocols: &'a [ProtocolId]) -> Self { Self { protocols, sections: &[] } }

    fn accepts(&self, section: &str) -> bool { self.sections.is_empty() || self.sections.iter().any(|s| s == section) }
}

/// BM25 and cosine rankings fused with RRF.
#[derive(Debug, Clone)]
pub struct HybridRanker {
    config: RankingConfig,
    bm25: Bm25Scorer,
}

fn by_score_then_ref(a: &(ChunkRef, f32), b: &(ChunkRef, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.ordinal.cmp(&b.0.ordinal))
        .then_with(|| a.0.protocol_id.cmp(&b.0.protocol_id))
}

impl HybridRanker {
    pub fn new(config: RankingConfig) -> Result<Self> {
        config.validate()?;
        let bm25 = Bm25Scorer::new(Bm25Params { k1: config.bm25_k1, b: config.bm25_b });
        Ok(Self { config, bm25 })
    }

    pub fn config(&self) -> &RankingConfig { &self.config }

    /// Rank chunks of `scope` for a query. Pure with respect to its inputs and
    /// the snapshot; `k` is capped at `max_results`.
    pub fn rank(&self, snapshot: &CorpusSnapshot, query_text: &str, query_embedding: &[f32], scope: Scope<'_>, k: usize) -> Result<Vec<RankedResult>> {
        if query_embedding.len() != snapshot.dim() {
            return Err(Error::DimensionMismatch { expected: snapshot.dim(), actual: query_embedding.len(), context: "query embedding".to_string() });
        }
        let ids: BTreeSet<&ProtocolId> = scope.protocols.iter().collect();
        let targets = ids.into_iter().map(|id| snapshot.require(id)).collect::<Result<Vec<_>>>()?;
        let k = k.min(self.config.max_results);
        if targets.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let terms = snapshot.analyzer().tokenize(query_text);
        let mut lexical: Vec<(ChunkRef, f32)> = Vec::new();
        let mut vector: Vec<(ChunkRef, f32)> = Vec::new();
        for p in &targets {
            let section_ok = |ordinal: u32| p.chunk(ordinal).is_some_and(|c| scope.accepts(&c.section));
            for (ordinal, score) in self.bm25.score(&p.lexical, snapshot.stats(), &terms) {
                if score > self.config.min_lexical_score && section_ok(ordinal) {
                    lexical.push((ChunkRef::new(p.id().clone(), ordinal), score));
                }
            }
            for (ordinal, sim) in p.vectors.search(query_embedding)? {
                let above = self.config.min_vector_similarity.map_or(true, |min| sim >= min);
                if above && section_ok(ordinal) {
                    vector.push((ChunkRef::new(p.id().clone(), ordinal), sim));
                }
            }
        }
        lexical.sort_by(by_score_then_ref);
        vector.sort_by(by_score_then_ref);

        let mut fused = fuse(&lexical, &vector, self.config.rrf_k);
        tracing::debug!(lexical = lexical.len(), vector = vector.len(), fused = fused.len(), k, generation = snapshot.generation(), "ranked query");
        fused.truncate(k);
        Ok(fused)
    }
}
