//! protoquery-text
//!
//! Lexical side of the hybrid index. Tantivy's analyzer chain does the
//! tokenization; postings, corpus statistics and BM25 scoring are kept in
//! memory per protocol so they can be swapped with the rest of a snapshot.
pub mod tantivy_utils;
pub mod index;
pub mod search;

pub use index::{CorpusStats, LexicalIndex, Posting, TermVector};
pub use search::{Bm25Params, Bm25Scorer};
pub use tantivy_utils::TermAnalyzer;
