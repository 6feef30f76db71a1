use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::index::{CorpusStats, LexicalIndex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

/// Okapi BM25 over one protocol's postings with corpus-wide statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bm25Scorer {
    params: Bm25Params,
}

impl Bm25Scorer {
    pub fn new(params: Bm25Params) -> Self { Self { params } }

    pub fn idf(stats: &CorpusStats, term: &str) -> f32 {
        let n = stats.doc_freq(term) as f32;
        let total = stats.total_chunks() as f32;
        (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
    }

    /// Scores every chunk of `index` that contains at least one query term.
    /// Repeated query terms count once. Sorted by score desc, ordinal asc.
    pub fn score(&self, index: &LexicalIndex, stats: &CorpusStats, query_terms: &[String]) -> Vec<(u32, f32)> {
        let Bm25Params { k1, b } = self.params;
        let avgdl = match stats.avg_chunk_len() { a if a > 0.0 => a, _ => 1.0 };
        let unique: BTreeSet<&str> = query_terms.iter().map(String::as_str).collect();

        let mut scores: HashMap<u32, f32> = HashMap::new();
        for term in unique {
            let postings = index.postings(term);
            if postings.is_empty() { continue; }
            let idf = Self::idf(stats, term);
            for p in postings {
                let tf = p.tf as f32;
                let dl = index.chunk_len(p.ordinal).unwrap_or(0) as f32;
                let norm = tf + k1 * (1.0 - b + b * dl / avgdl);
                *scores.entry(p.ordinal).or_insert(0.0) += idf * tf * (k1 + 1.0) / norm;
            }
        }

        let mut out: Vec<(u32, f32)> = scores.into_iter().collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
        out
    }
}
