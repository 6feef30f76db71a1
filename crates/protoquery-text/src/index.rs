use std::collections::{BTreeMap, HashMap};

use protoquery_core::error::{Error, Result};
use protoquery_core::types::Chunk;

use crate::tantivy_utils::TermAnalyzer;

/// Term frequencies of one chunk after analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermVector {
    pub terms: BTreeMap<String, u32>,
    pub length: u32,
}

impl TermVector {
    pub fn from_tokens<I: IntoIterator<Item = String>>(tokens: I) -> Self {
        let mut terms = BTreeMap::new();
        let mut length = 0u32;
        for t in tokens {
            *terms.entry(t).or_insert(0) += 1;
            length += 1;
        }
        Self { terms, length }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub ordinal: u32,
    pub tf: u32,
}

/// Inverted index over the chunks of a single protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalIndex {
    postings: BTreeMap<String, Vec<Posting>>,
    lengths: BTreeMap<u32, u32>,
    total_terms: u64,
}

impl LexicalIndex {
    pub fn build(analyzer: &TermAnalyzer, chunks: &[Chunk]) -> Self {
        let mut index = Self::default();
        for c in chunks {
            let tv = TermVector::from_tokens(analyzer.tokenize(&c.text));
            index.insert(c.ordinal, &tv);
        }
        index
    }

    fn insert(&mut self, ordinal: u32, tv: &TermVector) {
        for (term, &tf) in &tv.terms {
            self.postings.entry(term.clone()).or_default().push(Posting { ordinal, tf });
        }
        self.lengths.insert(ordinal, tv.length);
        self.total_terms += u64::from(tv.length);
    }

    pub fn postings(&self, term: &str) -> &[Posting] { self.postings.get(term).map(Vec::as_slice).unwrap_or(&[]) }

    pub fn chunk_len(&self, ordinal: u32) -> Option<u32> { self.lengths.get(&ordinal).copied() }

    pub fn chunk_count(&self) -> usize { self.lengths.len() }

    pub fn total_terms(&self) -> u64 { self.total_terms }

    pub fn ordinals(&self) -> impl Iterator<Item = u32> + '_ { self.lengths.keys().copied() }

    /// `(term, number of chunks containing it)`.
    pub fn doc_freqs(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.postings.iter().map(|(t, p)| (t.as_str(), p.len() as u64))
    }
}

/// Corpus-wide counts feeding BM25's IDF and length normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusStats {
    doc_freq: HashMap<String, u64>,
    total_chunks: u64,
    total_terms: u64,
}

impl CorpusStats {
    pub fn add(&mut self, index: &LexicalIndex) {
        for (term, df) in index.doc_freqs() {
            *self.doc_freq.entry(term.to_string()).or_insert(0) += df;
        }
        self.total_chunks += index.chunk_count() as u64;
        self.total_terms += index.total_terms();
    }

    /// Remove a protocol's contribution. Counts going negative means the
    /// stats and the protocol set have drifted apart.
    pub fn subtract(&mut self, index: &LexicalIndex) -> Result<()> {
        for (term, df) in index.doc_freqs() {
            let entry = self.doc_freq.get_mut(term).ok_or_else(|| Error::Consistency(format!("term '{term}' missing from corpus statistics")))?;
            *entry = entry
                .checked_sub(df)
                .ok_or_else(|| Error::Consistency(format!("document frequency underflow for '{term}'")))?;
            if *entry == 0 { self.doc_freq.remove(term); }
        }
        self.total_chunks = self
            .total_chunks
            .checked_sub(index.chunk_count() as u64)
            .ok_or_else(|| Error::Consistency("chunk count underflow in corpus statistics".to_string()))?;
        self.total_terms = self
            .total_terms
            .checked_sub(index.total_terms())
            .ok_or_else(|| Error::Consistency("term count underflow in corpus statistics".to_string()))?;
        Ok(())
    }

    pub fn doc_freq(&self, term: &str) -> u64 { self.doc_freq.get(term).copied().unwrap_or(0) }

    pub fn total_chunks(&self) -> u64 { self.total_chunks }

    pub fn total_terms(&self) -> u64 { self.total_terms }

    pub fn vocabulary_size(&self) -> usize { self.doc_freq.len() }

    pub fn avg_chunk_len(&self) -> f32 {
        if self.total_chunks == 0 { 0.0 } else { self.total_terms as f32 / self.total_chunks as f32 }
    }
}
