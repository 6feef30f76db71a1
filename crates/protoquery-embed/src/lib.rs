//! protoquery-embed
//!
//! Embedding providers behind the core `Embedder` trait: a candle-based
//! MiniLM model for real runs and a hashed bag-of-words embedder for tests.
use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protoquery_core::config::{expand_path, EmbeddingSettings};
use protoquery_core::traits::Embedder;

pub mod device;
pub mod hash;
pub mod minilm;
pub mod pool;
pub mod tokenize;

pub use hash::HashEmbedder;
pub use minilm::MiniLmEmbedder;
pub use pool::masked_mean_l2;

pub fn fake_embeddings_requested(settings: &EmbeddingSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Build the configured embedder and check it produces `dim`-wide vectors.
pub fn get_default_embedder(settings: &EmbeddingSettings, dim: usize) -> Result<Arc<dyn Embedder>> {
    if fake_embeddings_requested(settings) {
        tracing::info!(dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(dim)));
    }
    let model_dir = resolve_model_dir(settings)?;
    let model = MiniLmEmbedder::load(&model_dir, settings.max_len)?;
    if model.dim() != dim {
        bail!("model at {} produces {}-dim embeddings but index.dim is {}", model_dir.display(), model.dim(), dim);
    }
    Ok(Arc::new(model))
}

fn resolve_model_dir(settings: &EmbeddingSettings) -> Result<PathBuf> {
    if let Some(dir) = &settings.model_dir {
        let p = expand_path(dir);
        if p.exists() { return Ok(p); }
        bail!("embedding.model_dir {} does not exist", p.display());
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir);
            if p.exists() { tracing::debug!(dir = %p.display(), var, "using model dir"); return Ok(p); }
        }
    }
    let default = Path::new("models/all-MiniLM-L6-v2");
    if default.exists() { return Ok(default.to_path_buf()); }
    Err(anyhow!("Could not locate the all-MiniLM-L6-v2 model directory; set embedding.model_dir or APP_MODEL_DIR"))
}
