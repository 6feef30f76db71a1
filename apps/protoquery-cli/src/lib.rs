//! Shared bootstrap for the protoquery binaries.
//!
//! Loads settings, opens the LanceDB store, wraps the embedder in the content
//! cache and restores the persisted corpus into a fresh in-memory index.
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use protoquery_core::chunker::Chunker;
use protoquery_core::config::{Config, Settings};
use protoquery_core::extract::PlainTextExtractor;
use protoquery_core::traits::{Embedder, ProtocolStore};
use protoquery_core::types::ProtocolId;
use protoquery_embed::get_default_embedder;
use protoquery_hybrid::{restore, Indexer, Ingestor, Orchestrator};
use protoquery_reason::AnthropicReasoner;
use protoquery_vector::{LanceCachedEmbedder, LanceProtocolStore};

/// Log to stderr so stdout stays parseable. `RUST_LOG` overrides the default.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).try_init();
}

pub fn load_settings() -> Result<Settings> {
    let config = Config::load()?;
    let settings = config.settings()?;
    tracing::debug!(env = config.env_name(), "loaded settings");
    Ok(settings)
}

pub struct App {
    pub settings: Settings,
    pub store: Arc<LanceProtocolStore>,
    pub indexer: Arc<Indexer>,
    pub embedder: Arc<dyn Embedder>,
}

impl App {
    pub async fn open(settings: Settings) -> Result<Self> {
        let dim = settings.index.dim;
        let model = get_default_embedder(&settings.embedding, dim)?;
        let dir = settings.data.store_path();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating store directory {}", dir.display()))?;
        let uri = dir.to_string_lossy().to_string();
        let store = Arc::new(LanceProtocolStore::open(&uri, dim, model.embedder_id(), &settings.data).await?);
        let embedder: Arc<dyn Embedder> = Arc::new(LanceCachedEmbedder::new(model, store.connection().clone(), &settings.data.cache_table));

        let indexer = Arc::new(Indexer::new(dim, settings.index.remove_stop_words));
        restore(store.as_ref(), &indexer).await?;
        Ok(Self { settings, store, indexer, embedder })
    }

    pub fn ingestor(&self) -> Result<Ingestor> {
        let chunker = Chunker::new(self.settings.chunking.clone())?;
        let store: Arc<dyn ProtocolStore> = self.store.clone();
        Ok(Ingestor::new(chunker, Arc::new(PlainTextExtractor), self.embedder.clone(), self.indexer.clone(), self.settings.retrieval.clone())
            .with_store(store))
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let orch = Orchestrator::new(self.indexer.clone(), self.settings.ranking.clone(), self.settings.retrieval.clone(), self.embedder.clone())?;
        match AnthropicReasoner::from_settings(&self.settings.reasoning, self.settings.retrieval.reasoning_timeout())? {
            Some(r) => Ok(orch.with_reasoner(Arc::new(r))),
            None => {
                tracing::debug!("no reasoning api key configured");
                Ok(orch)
            }
        }
    }
}

/// Protocol id for a file: its stem, e.g. `NCT01234567.txt` → `NCT01234567`.
pub fn protocol_id_for(path: &Path) -> Result<ProtocolId> {
    let stem = path.file_stem().and_then(|s| s.to_str()).with_context(|| format!("no usable file name in {}", path.display()))?;
    Ok(ProtocolId::new(stem)?)
}

/// Copy of `settings` safe to print.
pub fn masked(settings: &Settings) -> Settings {
    let mut out = settings.clone();
    if let Some(key) = out.reasoning.api_key.as_mut() {
        let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        *key = if key.chars().count() > 8 { format!("****{tail}") } else { "****".to_string() };
    }
    out
}
