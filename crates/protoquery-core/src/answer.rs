//! Request and answer shapes exchanged with the reasoning service.
//!
//! The reasoning service is a black box; the only thing the core relies on is
//! the answer schema below. Anything that does not fit it is rejected.

use serde::{Deserialize, Serialize};

use crate::types::ChunkRef;

/// Everything a reasoning backend needs to produce an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub system: String,
    pub question: String,
    /// Rendered evidence block (section labels + chunk texts).
    pub context: String,
}

impl ReasoningRequest {
    /// The user turn sent to chat-style backends.
    pub fn user_message(&self) -> String {
        format!(
            "Based on the following protocol excerpts, answer this question.\n\n\
             Question: {}\n\n\
             Protocol context:\n{}\n\n\
             Answer only from the context. If it is insufficient, say so.\n\
             Respond with a single JSON object and nothing else:\n\
             {{\"answer\": \"<markdown answer>\", \"citations\": [\"<chunk id>\", ...]}}\n\
             where each chunk id is one of the bracketed ids shown in the context.",
            self.question, self.context
        )
    }
}

/// Validated answer: free text plus citations into the supplied evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<ChunkRef>,
}

#[derive(Deserialize)]
struct WireAnswer {
    answer: String,
    #[serde(default)]
    citations: Vec<String>,
}

impl StructuredAnswer {
    /// Parse and validate a raw answer against the evidence that was supplied.
    ///
    /// Returns a human-readable reason when the payload does not match the
    /// schema: not JSON, empty answer, unparseable citation, or a citation
    /// pointing at a chunk that was not part of the context.
    pub fn parse(raw: &str, supplied: &[ChunkRef]) -> Result<Self, String> {
        let body = strip_code_fence(raw);
        let wire: WireAnswer = serde_json::from_str(body).map_err(|e| format!("answer is not valid JSON of the expected shape: {e}"))?;
        if wire.answer.trim().is_empty() {
            return Err("answer text is empty".to_string());
        }
        let mut citations = Vec::with_capacity(wire.citations.len());
        for c in &wire.citations {
            let marker = c.trim().trim_start_matches('[').trim_end_matches(']');
            let chunk: ChunkRef = marker.parse().map_err(|e| format!("bad citation '{c}': {e}"))?;
            if !supplied.contains(&chunk) {
                return Err(format!("citation '{chunk}' does not reference supplied evidence"));
            }
            if !citations.contains(&chunk) { citations.push(chunk); }
        }
        Ok(Self { answer: wire.answer, citations })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
