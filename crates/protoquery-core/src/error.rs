use thiserror::Error;

/// Coarse error families; callers branch on these rather than on variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or empty input, dimension mismatch, bad configuration. Never retried.
    Input,
    /// An external collaborator failed or timed out.
    DependencyUnavailable,
    /// Unknown protocol, or nothing to reason over.
    NotFound,
    /// A snapshot was observed in an inconsistent state. Fatal.
    Consistency,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("document for protocol '{protocol_id}' has no extractable content")]
    EmptyDocument { protocol_id: String },

    #[error("protocol '{protocol_id}': a single sentence of ~{tokens} tokens exceeds the chunk budget of {budget}")]
    ChunkTooLarge { protocol_id: String, tokens: usize, budget: usize },

    #[error("embedding dimension mismatch ({context}): expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize, context: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("embedding service unavailable ({context}): {reason}")]
    EmbeddingUnavailable { context: String, reason: String },

    #[error("reasoning service unavailable ({context}): {reason}")]
    ReasoningUnavailable { context: String, reason: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("protocol not found: {0}")]
    ProtocolNotFound(String),

    #[error("no evidence found in protocol '{protocol_id}' for: {query}")]
    NoEvidence { protocol_id: String, query: String },

    #[error("index consistency violated: {0}")]
    Consistency(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyDocument { .. }
            | Self::ChunkTooLarge { .. }
            | Self::DimensionMismatch { .. }
            | Self::InvalidConfig(_)
            | Self::InvalidInput(_) => ErrorKind::Input,
            Self::ExtractionFailed { .. }
            | Self::EmbeddingUnavailable { .. }
            | Self::ReasoningUnavailable { .. }
            | Self::StorageUnavailable(_) => ErrorKind::DependencyUnavailable,
            Self::ProtocolNotFound(_) | Self::NoEvidence { .. } => ErrorKind::NotFound,
            Self::Consistency(_) => ErrorKind::Consistency,
        }
    }

    pub fn is_fatal(&self) -> bool { self.kind() == ErrorKind::Consistency }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an external collaborator. The orchestrator decides
/// which domain error it becomes and whether one retry is allowed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Transport-level failure worth one more attempt (connect reset, 5xx, 429).
    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Failed(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool { matches!(self, Self::Transient(_)) }
}

impl From<anyhow::Error> for CollaboratorError {
    fn from(e: anyhow::Error) -> Self { Self::Failed(format!("{e:#}")) }
}
