//! Narrow interfaces to the collaborators the core depends on.

use async_trait::async_trait;
use std::path::Path;

use crate::answer::ReasoningRequest;
use crate::error::CollaboratorError;
use crate::types::{Protocol, ProtocolId};

/// Turns a document on disk into raw text.
pub trait Extractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `hash:d384`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Returns the raw answer payload; validation happens in the core.
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, CollaboratorError>;
}

/// Durable storage for protocols and their chunks.
#[async_trait]
pub trait ProtocolStore: Send + Sync {
    async fn list_protocols(&self) -> anyhow::Result<Vec<ProtocolId>>;
    async fn load_protocol(&self, id: &ProtocolId) -> anyhow::Result<Option<Protocol>>;
    /// Replaces every stored chunk of `protocol.id` in one commit.
    async fn replace_protocol(&self, protocol: &Protocol) -> anyhow::Result<()>;
    /// Returns `false` when nothing was stored under `id`.
    async fn remove_protocol(&self, id: &ProtocolId) -> anyhow::Result<bool>;
}
