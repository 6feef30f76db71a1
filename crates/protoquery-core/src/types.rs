//! Domain types shared by the chunker, the indexes and the orchestration layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Section label carried by chunks that precede any recognised heading.
pub const UNLABELED: &str = "unlabeled";

/// User-supplied protocol identifier (e.g. an NCT number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(String);

impl ProtocolId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("protocol id must not be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for ProtocolId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::new(s) }
}

/// Stable reference to one chunk: `(protocol, ordinal)`.
///
/// Rendered as `<protocol>:<ordinal>`; this is the form citations use when
/// the reasoning service points back at evidence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub protocol_id: ProtocolId,
    pub ordinal: u32,
}

impl ChunkRef {
    pub fn new(protocol_id: ProtocolId, ordinal: u32) -> Self { Self { protocol_id, ordinal } }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol_id, self.ordinal)
    }
}

impl FromStr for ChunkRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (pid, ord) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("chunk reference '{s}' is not of the form <protocol>:<ordinal>")))?;
        let ordinal = ord
            .parse::<u32>()
            .map_err(|_| Error::InvalidInput(format!("chunk reference '{s}' has a non-numeric ordinal")))?;
        Ok(Self { protocol_id: ProtocolId::new(pid)?, ordinal })
    }
}

/// A chunk as produced by the chunker, before it has an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub section: String,
    pub text: String,
}

/// A bounded unit of protocol text: the atomic retrieval and comparison item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub protocol_id: ProtocolId,
    pub ordinal: u32,
    pub section: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn chunk_ref(&self) -> ChunkRef { ChunkRef::new(self.protocol_id.clone(), self.ordinal) }

    pub fn is_labeled(&self) -> bool { self.section != UNLABELED }
}

/// One ingested protocol document and the chunks it exclusively owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    pub id: ProtocolId,
    pub chunks: Vec<Chunk>,
    pub ingested_at: DateTime<Utc>,
}

impl Protocol {
    /// Assemble a protocol from chunker drafts and their embeddings.
    pub fn from_drafts(id: ProtocolId, drafts: Vec<ChunkDraft>, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        if drafts.len() != embeddings.len() {
            return Err(Error::InvalidInput(format!(
                "protocol '{id}': {} chunks but {} embeddings",
                drafts.len(),
                embeddings.len()
            )));
        }
        let chunks = drafts
            .into_iter()
            .zip(embeddings)
            .map(|(d, embedding)| Chunk { protocol_id: id.clone(), ordinal: d.ordinal, section: d.section, text: d.text, embedding })
            .collect();
        Ok(Self { id, chunks, ingested_at: Utc::now() })
    }

    pub fn chunk(&self, ordinal: u32) -> Option<&Chunk> {
        self.chunks.get(ordinal as usize).filter(|c| c.ordinal == ordinal)
    }
}

/// Restricts retrieval to a set of protocols and, optionally, section labels.
///
/// An empty `protocols` list means the whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub protocols: Vec<ProtocolId>,
    pub sections: Vec<String>,
}

impl SearchFilter {
    pub fn protocol(id: ProtocolId) -> Self { Self { protocols: vec![id], sections: Vec::new() } }

    pub fn with_sections(mut self, sections: Vec<String>) -> Self {
        self.sections = sections.into_iter().map(|s| s.trim().to_lowercase()).collect();
        self
    }

    pub fn accepts_section(&self, section: &str) -> bool {
        self.sections.is_empty() || self.sections.iter().any(|s| s == section)
    }
}

/// One entry of a fused ranking. Ranks are 1-based; `None` means the chunk
/// was absent from that list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk: ChunkRef,
    pub fused_score: f64,
    pub lexical_rank: Option<u32>,
    pub vector_rank: Option<u32>,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
}

/// A ranked result resolved against the snapshot it was ranked on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub result: RankedResult,
    pub section: String,
    pub content: String,
}

/// How a chunk of one protocol relates to the other protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "equivalent")]
    Equivalent,
    #[serde(rename = "modified")]
    Modified,
    /// Present in A with no confirmed counterpart in B ("removed-from-B"
    /// when B is read as the baseline).
    #[serde(rename = "added-in-A")]
    AddedInA,
    #[serde(rename = "added-in-B")]
    AddedInB,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equivalent => "equivalent",
            Self::Modified => "modified",
            Self::AddedInA => "added-in-A",
            Self::AddedInB => "added-in-B",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPair {
    pub a: Option<ChunkRef>,
    pub b: Option<ChunkRef>,
    pub classification: Classification,
    pub similarity: f32,
}
