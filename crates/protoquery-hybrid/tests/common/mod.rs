#![allow(dead_code)]
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protoquery_core::answer::ReasoningRequest;
use protoquery_core::chunker::Chunker;
use protoquery_core::config::RetrievalConfig;
use protoquery_core::error::CollaboratorError;
use protoquery_core::extract::PlainTextExtractor;
use protoquery_core::traits::{Embedder, ProtocolStore, Reasoner};
use protoquery_core::types::{Chunk, Protocol, ProtocolId};
use protoquery_embed::HashEmbedder;
use protoquery_hybrid::{Indexer, Ingestor};

pub const DIM: usize = 64;

pub const PROTOCOL_TEXT: &str = "A randomized phase 2 study of pembrolizumab in advanced melanoma.

INCLUSION CRITERIA
1. Age 18 years or older at screening.
2. Measurable disease per RECIST version 1.1.
3. Adequate hepatic function within normal limits.

EXCLUSION CRITERIA
1. Active hepatitis B or hepatitis C infection.
2. Prior treatment with an anti PD-1 antibody.

SAFETY
Serious adverse events must be reported within 24 hours of awareness.
";

pub fn pid(s: &str) -> ProtocolId { ProtocolId::new(s).unwrap() }

pub fn ingestor(indexer: Arc<Indexer>) -> Ingestor {
    Ingestor::new(Chunker::default(), Arc::new(PlainTextExtractor), Arc::new(HashEmbedder::new(DIM)), indexer, RetrievalConfig::default())
}

/// Protocol with hand-picked embeddings; every chunk is unlabeled unless a
/// section is given.
pub fn protocol_with(id: &str, rows: &[(&str, &str, Vec<f32>)]) -> Protocol {
    let id = pid(id);
    let chunks = rows
        .iter()
        .enumerate()
        .map(|(i, (section, text, embedding))| Chunk {
            protocol_id: id.clone(),
            ordinal: i as u32,
            section: section.to_string(),
            text: text.to_string(),
            embedding: embedding.clone(),
        })
        .collect();
    Protocol { id, chunks, ingested_at: chrono::Utc::now() }
}

/// Same vector for every text, so the vector ranking carries no signal.
pub struct ConstantEmbedder {
    pub dim: usize,
}

#[async_trait]
impl Embedder for ConstantEmbedder {
    fn embedder_id(&self) -> &str { "constant" }
    fn dim(&self) -> usize { self.dim }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let mut v = vec![0.0; self.dim];
        v[0] = 1.0;
        Ok(texts.iter().map(|_| v.clone()).collect())
    }
}

/// Fails transiently for the first `failures` calls, then delegates.
pub struct FlakyEmbedder {
    pub inner: HashEmbedder,
    pub failures: usize,
    pub calls: AtomicUsize,
    pub permanent: bool,
}

impl FlakyEmbedder {
    pub fn new(failures: usize, permanent: bool) -> Self {
        Self { inner: HashEmbedder::new(DIM), failures, calls: AtomicUsize::new(0), permanent }
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn embedder_id(&self) -> &str { "flaky" }
    fn dim(&self) -> usize { DIM }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(if self.permanent { CollaboratorError::Failed("bad request".into()) } else { CollaboratorError::Transient("connection reset".into()) });
        }
        self.inner.embed_batch(texts).await
    }
}

/// Returns a canned payload and remembers the last request.
pub struct CannedReasoner {
    pub reply: String,
    pub delay: Duration,
    pub last: Mutex<Option<ReasoningRequest>>,
}

impl CannedReasoner {
    pub fn new(reply: &str) -> Self { Self { reply: reply.to_string(), delay: Duration::ZERO, last: Mutex::new(None) } }

    pub fn slow(delay: Duration) -> Self { Self { delay, ..Self::new("{\"answer\": \"late\"}") } }
}

#[async_trait]
impl Reasoner for CannedReasoner {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, CollaboratorError> {
        *self.last.lock() = Some(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

/// In-memory store that records every commit and stalls on multi-chunk
/// protocols after recording them.
#[derive(Default)]
pub struct RecordingStore {
    pub commits: Mutex<Vec<Protocol>>,
    pub stall: Duration,
}

impl RecordingStore {
    pub fn stalling(stall: Duration) -> Self { Self { stall, ..Self::default() } }

    pub fn last_commit(&self) -> Option<Protocol> { self.commits.lock().last().cloned() }
}

#[async_trait]
impl ProtocolStore for RecordingStore {
    async fn list_protocols(&self) -> anyhow::Result<Vec<ProtocolId>> {
        let mut ids: Vec<ProtocolId> = self.commits.lock().iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn load_protocol(&self, id: &ProtocolId) -> anyhow::Result<Option<Protocol>> {
        Ok(self.commits.lock().iter().rev().find(|p| &p.id == id).cloned())
    }

    async fn replace_protocol(&self, protocol: &Protocol) -> anyhow::Result<()> {
        self.commits.lock().push(protocol.clone());
        if protocol.chunks.len() > 1 {
            tokio::time::sleep(self.stall).await;
        }
        Ok(())
    }

    async fn remove_protocol(&self, id: &ProtocolId) -> anyhow::Result<bool> {
        let mut commits = self.commits.lock();
        let before = commits.len();
        commits.retain(|p| &p.id != id);
        Ok(commits.len() != before)
    }
}
