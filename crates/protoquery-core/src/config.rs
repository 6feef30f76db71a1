//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `Settings::default()` + `config.toml` +
//! `config.<env>.toml` + `APP_*` env vars (`__` separates nested keys, e.g.
//! `APP_RANKING__RRF_K=40`). Store paths expand `~` and `${VAR}`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
    env_name: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment, env_name })
    }

    /// Build from an explicit figment; used by tests and embedders of the library.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment: Figment::from(Serialized::defaults(Settings::default())).merge(figment), env_name: "custom".to_string() }
    }

    pub fn env_name(&self) -> &str { &self.env_name }

    /// Extract and validate the full settings tree.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if settings.reasoning.api_key.is_none() {
            settings.reasoning.api_key = env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.trim().is_empty());
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingConfig,
    pub index: IndexSettings,
    pub ranking: RankingConfig,
    pub retrieval: RetrievalConfig,
    pub alignment: AlignmentThresholds,
    pub embedding: EmbeddingSettings,
    pub reasoning: ReasoningSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.ranking.validate()?;
        self.alignment.validate()?;
        if self.index.dim == 0 {
            return Err(Error::InvalidConfig("index.dim must be positive".to_string()));
        }
        if self.retrieval.what_if_top_k == 0 || self.retrieval.context_token_budget == 0 {
            return Err(Error::InvalidConfig("retrieval.what_if_top_k and retrieval.context_token_budget must be positive".to_string()));
        }
        if self.retrieval.embed_batch_size == 0 {
            return Err(Error::InvalidConfig("retrieval.embed_batch_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub store_dir: String,
    pub chunks_table: String,
    pub protocols_table: String,
    pub cache_table: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            store_dir: "./data/protoquery".to_string(),
            chunks_table: "chunks".to_string(),
            protocols_table: "protocols".to_string(),
            cache_table: "emb_cache".to_string(),
        }
    }
}

impl DataSettings {
    pub fn store_path(&self) -> PathBuf { expand_path(&self.store_dir) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    /// Share of `max_tokens` repeated at the start of the next window.
    pub overlap_fraction: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self { Self { max_tokens: 512, overlap_fraction: 0.15 } }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("chunking.max_tokens must be positive".to_string()));
        }
        if !(0.0..0.5).contains(&self.overlap_fraction) {
            return Err(Error::InvalidConfig(format!("chunking.overlap_fraction must be in [0, 0.5), got {}", self.overlap_fraction)));
        }
        Ok(())
    }

    pub fn overlap_tokens(&self) -> usize { (self.max_tokens as f32 * self.overlap_fraction) as usize }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub dim: usize,
    pub remove_stop_words: bool,
}

impl Default for IndexSettings {
    fn default() -> Self { Self { dim: 384, remove_stop_words: true } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Reciprocal-rank-fusion constant.
    pub rrf_k: f64,
    pub default_results: usize,
    /// Hard ceiling on k for any ranking call.
    pub max_results: usize,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    /// Chunks scoring at or below this are left out of the lexical list.
    pub min_lexical_score: f32,
    /// Chunks below this cosine similarity are left out of the vector list.
    pub min_vector_similarity: Option<f32>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            default_results: 10,
            max_results: 50,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            min_lexical_score: 0.0,
            min_vector_similarity: None,
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rrf_k <= 0.0 {
            return Err(Error::InvalidConfig("ranking.rrf_k must be positive".to_string()));
        }
        if self.max_results == 0 {
            return Err(Error::InvalidConfig("ranking.max_results must be positive".to_string()));
        }
        if self.bm25_k1 < 0.0 || !(0.0..=1.0).contains(&self.bm25_b) {
            return Err(Error::InvalidConfig("ranking.bm25_k1 must be >= 0 and ranking.bm25_b in [0, 1]".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub what_if_top_k: usize,
    /// Estimated-token ceiling for the evidence block of a what-if prompt.
    pub context_token_budget: usize,
    pub embed_timeout_ms: u64,
    pub reasoning_timeout_ms: u64,
    pub embed_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { what_if_top_k: 15, context_token_budget: 3000, embed_timeout_ms: 30_000, reasoning_timeout_ms: 120_000, embed_batch_size: 32 }
    }
}

impl RetrievalConfig {
    pub fn embed_timeout(&self) -> Duration { Duration::from_millis(self.embed_timeout_ms) }
    pub fn reasoning_timeout(&self) -> Duration { Duration::from_millis(self.reasoning_timeout_ms) }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentThresholds {
    pub high: f32,
    pub low: f32,
}

impl Default for AlignmentThresholds {
    fn default() -> Self { Self { high: 0.95, low: 0.80 } }
}

impl AlignmentThresholds {
    pub fn new(high: f32, low: f32) -> Result<Self> {
        let t = Self { high, low };
        t.validate()?;
        Ok(t)
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |x: f32| (-1.0..=1.0).contains(&x);
        if !in_range(self.high) || !in_range(self.low) {
            return Err(Error::InvalidConfig(format!("alignment thresholds must lie in [-1, 1] (high={}, low={})", self.high, self.low)));
        }
        if self.high <= self.low {
            return Err(Error::InvalidConfig(format!("alignment.high ({}) must be greater than alignment.low ({})", self.high, self.low)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: Option<String>,
    pub use_fake: bool,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self { Self { model_dir: None, use_fake: false, max_len: 256 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub max_tokens: u32,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            endpoint: "https://api.anthropic.com".to_string(),
            max_tokens: 1024,
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
