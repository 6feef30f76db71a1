//! Analyzer chain shared by indexing and querying.
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer};

pub const STOP_WORDS: &[&str] = &[
    "a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

/// Tokens longer than this are dropped (base64 blobs, table rules).
const MAX_TOKEN_LEN: usize = 40;

pub fn build_analyzer(remove_stop_words: bool) -> TextAnalyzer {
    let builder = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser);
    if remove_stop_words {
        builder.filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| s.to_string()))).build()
    } else {
        builder.build()
    }
}

/// Shared analyzer used for both indexing and queries so the two always
/// agree on case folding and stop words.
#[derive(Clone)]
pub struct TermAnalyzer {
    analyzer: TextAnalyzer,
}

impl TermAnalyzer {
    pub fn new(remove_stop_words: bool) -> Self { Self { analyzer: build_analyzer(remove_stop_words) } }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut out = Vec::new();
        while stream.advance() { out.push(stream.token().text.clone()); }
        out
    }
}

impl Default for TermAnalyzer {
    fn default() -> Self { Self::new(true) }
}

impl std::fmt::Debug for TermAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("TermAnalyzer") }
}
