//! Ingestion pipeline: extract → chunk → embed → persist → publish.
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use protoquery_core::chunker::Chunker;
use protoquery_core::config::RetrievalConfig;
use protoquery_core::error::{Error, Result};
use protoquery_core::traits::{Embedder, Extractor, ProtocolStore};
use protoquery_core::types::{Protocol, ProtocolId};

use crate::calls::embed_with_retry;
use crate::catalog::Indexer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub protocol_id: ProtocolId,
    pub chunks: usize,
    pub generation: u64,
}

pub struct Ingestor {
    chunker: Chunker,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn Embedder>,
    indexer: Arc<Indexer>,
    store: Option<Arc<dyn ProtocolStore>>,
    retrieval: RetrievalConfig,
}

fn storage(e: anyhow::Error) -> Error { Error::StorageUnavailable(format!("{e:#}")) }

impl Ingestor {
    pub fn new(chunker: Chunker, extractor: Arc<dyn Extractor>, embedder: Arc<dyn Embedder>, indexer: Arc<Indexer>, retrieval: RetrievalConfig) -> Self {
        Self { chunker, extractor, embedder, indexer, store: None, retrieval }
    }

    /// Persist every ingested protocol to `store` before publishing it.
    pub fn with_store(mut self, store: Arc<dyn ProtocolStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn indexer(&self) -> &Arc<Indexer> { &self.indexer }

    pub async fn ingest_file(&self, protocol_id: &ProtocolId, path: &Path) -> Result<IngestReport> {
        let text = self
            .extractor
            .extract(path)
            .map_err(|e| Error::ExtractionFailed { path: path.display().to_string(), reason: e.to_string() })?;
        self.ingest_text(protocol_id, &text).await
    }

    pub async fn ingest_text(&self, protocol_id: &ProtocolId, text: &str) -> Result<IngestReport> {
        let drafts = self.chunker.chunk(protocol_id, text)?;
        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let context = format!("ingest {protocol_id}");
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.retrieval.embed_batch_size.max(1)) {
            let vectors = embed_with_retry(self.embedder.as_ref(), batch, self.indexer.dim(), self.retrieval.embed_timeout(), &context).await?;
            embeddings.extend(vectors);
        }
        let protocol = Protocol::from_drafts(protocol_id.clone(), drafts, embeddings)?;
        self.publish(protocol).await
    }

    /// Persist (when a store is configured) and index an already-embedded protocol.
    pub async fn publish(&self, protocol: Protocol) -> Result<IngestReport> {
        self.indexer.validate(&protocol)?;
        let _commit = self.indexer.lock_commits().await;
        if let Some(store) = &self.store {
            store.replace_protocol(&protocol).await.map_err(storage)?;
        }
        let protocol_id = protocol.id.clone();
        let chunks = protocol.chunks.len();
        let generation = self.indexer.ingest(protocol)?;
        Ok(IngestReport { protocol_id, chunks, generation })
    }

    /// Remove from the store and the index. `ProtocolNotFound` if neither had it.
    pub async fn remove(&self, protocol_id: &ProtocolId) -> Result<u64> {
        let _commit = self.indexer.lock_commits().await;
        let stored = match &self.store {
            Some(store) => store.remove_protocol(protocol_id).await.map_err(storage)?,
            None => false,
        };
        match self.indexer.remove(protocol_id)? {
            Some(generation) => Ok(generation),
            None if stored => Ok(self.indexer.snapshot().generation()),
            None => Err(Error::ProtocolNotFound(protocol_id.to_string())),
        }
    }
}

/// Load every stored protocol into `indexer`. Returns how many were loaded.
pub async fn restore(store: &dyn ProtocolStore, indexer: &Indexer) -> Result<usize> {
    let ids = store.list_protocols().await.map_err(storage)?;
    let mut loaded = 0;
    for id in ids {
        match store.load_protocol(&id).await.map_err(storage)? {
            Some(protocol) => {
                indexer.ingest(protocol)?;
                loaded += 1;
            }
            None => tracing::warn!(protocol = %id, "listed protocol vanished before load"),
        }
    }
    tracing::info!(protocols = loaded, "restored index from store");
    Ok(loaded)
}
