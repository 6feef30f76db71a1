//! Indexed corpus published as immutable snapshots.
//!
//! Readers clone the current `Arc<CorpusSnapshot>` under a short read lock
//! and keep using it for the whole query. Writers build the new protocol's
//! indexes without any lock, then take the writer mutex, derive the next
//! snapshot from the current one and swap it in.
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

use protoquery_core::error::{Error, Result};
use protoquery_core::types::{Chunk, ChunkRef, Protocol, ProtocolId};
use protoquery_text::{CorpusStats, LexicalIndex, TermAnalyzer};
use protoquery_vector::VectorIndex;

/// One protocol with its lexical and vector indexes.
#[derive(Debug)]
pub struct ProtocolSnapshot {
    pub protocol: Arc<Protocol>,
    pub lexical: LexicalIndex,
    pub vectors: VectorIndex,
}

impl ProtocolSnapshot {
    pub fn id(&self) -> &ProtocolId { &self.protocol.id }

    pub fn chunks(&self) -> &[Chunk] { &self.protocol.chunks }

    pub fn chunk(&self, ordinal: u32) -> Option<&Chunk> { self.protocol.chunk(ordinal) }
}

#[derive(Debug)]
pub struct CorpusSnapshot {
    generation: u64,
    dim: usize,
    analyzer: TermAnalyzer,
    protocols: BTreeMap<ProtocolId, Arc<ProtocolSnapshot>>,
    stats: CorpusStats,
}

impl CorpusSnapshot {
    fn empty(dim: usize, analyzer: TermAnalyzer) -> Self {
        Self { generation: 0, dim, analyzer, protocols: BTreeMap::new(), stats: CorpusStats::default() }
    }

    pub fn generation(&self) -> u64 { self.generation }

    pub fn dim(&self) -> usize { self.dim }

    pub fn analyzer(&self) -> &TermAnalyzer { &self.analyzer }

    pub fn stats(&self) -> &CorpusStats { &self.stats }

    pub fn get(&self, id: &ProtocolId) -> Option<&Arc<ProtocolSnapshot>> { self.protocols.get(id) }

    /// Like [`get`](Self::get) but unknown ids become `ProtocolNotFound`.
    pub fn require(&self, id: &ProtocolId) -> Result<&Arc<ProtocolSnapshot>> {
        self.protocols.get(id).ok_or_else(|| Error::ProtocolNotFound(id.to_string()))
    }

    pub fn protocol_ids(&self) -> impl Iterator<Item = &ProtocolId> + '_ { self.protocols.keys() }

    pub fn protocols(&self) -> impl Iterator<Item = &Arc<ProtocolSnapshot>> + '_ { self.protocols.values() }

    pub fn len(&self) -> usize { self.protocols.len() }

    pub fn is_empty(&self) -> bool { self.protocols.is_empty() }

    pub fn chunk(&self, r: &ChunkRef) -> Option<&Chunk> { self.protocols.get(&r.protocol_id)?.chunk(r.ordinal) }
}

pub struct Indexer {
    dim: usize,
    analyzer: TermAnalyzer,
    current: RwLock<Arc<CorpusSnapshot>>,
    writer: Mutex<()>,
    /// Orders durable commits and their publishes across every ingestor
    /// sharing this indexer.
    commits: tokio::sync::Mutex<()>,
}

impl Indexer {
    pub fn new(dim: usize, remove_stop_words: bool) -> Self {
        let analyzer = TermAnalyzer::new(remove_stop_words);
        Self { dim, analyzer: analyzer.clone(), current: RwLock::new(Arc::new(CorpusSnapshot::empty(dim, analyzer))), writer: Mutex::new(()), commits: tokio::sync::Mutex::new(()) }
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn snapshot(&self) -> Arc<CorpusSnapshot> { Arc::clone(&self.current.read()) }

    /// Hold across a store commit and the matching `ingest`/`remove` so the
    /// index ends on the version the store committed last.
    pub async fn lock_commits(&self) -> tokio::sync::MutexGuard<'_, ()> { self.commits.lock().await }

    /// Checks a protocol is indexable without touching the corpus.
    pub fn validate(&self, protocol: &Protocol) -> Result<()> {
        for (i, c) in protocol.chunks.iter().enumerate() {
            if c.protocol_id != protocol.id {
                return Err(Error::InvalidInput(format!("chunk {} does not belong to protocol '{}'", c.chunk_ref(), protocol.id)));
            }
            if c.ordinal as usize != i {
                return Err(Error::InvalidInput(format!("protocol '{}': ordinals must be contiguous from 0, found {} at position {i}", protocol.id, c.ordinal)));
            }
            if c.embedding.len() != self.dim {
                return Err(Error::DimensionMismatch { expected: self.dim, actual: c.embedding.len(), context: format!("chunk {}", c.chunk_ref()) });
            }
        }
        Ok(())
    }

    /// Index `protocol`, replacing any previous version. Returns the
    /// generation of the published snapshot.
    pub fn ingest(&self, protocol: Protocol) -> Result<u64> {
        self.validate(&protocol)?;
        let vectors = VectorIndex::build(self.dim, &protocol.chunks)?;
        let lexical = LexicalIndex::build(&self.analyzer, &protocol.chunks);
        let entry = Arc::new(ProtocolSnapshot { protocol: Arc::new(protocol), lexical, vectors });
        let id = entry.id().clone();
        let chunk_count = entry.chunks().len();

        let _guard = self.writer.lock();
        let current = self.snapshot();
        let mut stats = current.stats.clone();
        let replaced = current.protocols.get(&id);
        if let Some(old) = replaced {
            Self::subtract(&mut stats, old)?;
        }
        stats.add(&entry.lexical);
        let mut protocols = current.protocols.clone();
        protocols.insert(id.clone(), entry);
        let generation = self.publish(&current, protocols, stats);
        tracing::info!(protocol = %id, chunks = chunk_count, generation, replaced = replaced.is_some(), "indexed protocol");
        Ok(generation)
    }

    /// Evict a protocol. Returns `None` when it was not indexed.
    pub fn remove(&self, id: &ProtocolId) -> Result<Option<u64>> {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        let Some(old) = current.protocols.get(id) else { return Ok(None) };
        let mut stats = current.stats.clone();
        Self::subtract(&mut stats, old)?;
        let mut protocols = current.protocols.clone();
        protocols.remove(id);
        let generation = self.publish(&current, protocols, stats);
        tracing::info!(protocol = %id, generation, "removed protocol from index");
        Ok(Some(generation))
    }

    fn subtract(stats: &mut CorpusStats, old: &ProtocolSnapshot) -> Result<()> {
        stats.subtract(&old.lexical).map_err(|e| {
            tracing::error!(protocol = %old.id(), error = %e, "corpus statistics out of sync");
            e
        })
    }

    fn publish(&self, current: &CorpusSnapshot, protocols: BTreeMap<ProtocolId, Arc<ProtocolSnapshot>>, stats: CorpusStats) -> u64 {
        let generation = current.generation + 1;
        let next = CorpusSnapshot { generation, dim: self.dim, analyzer: self.analyzer.clone(), protocols, stats };
        *self.current.write() = Arc::new(next);
        generation
    }
}
