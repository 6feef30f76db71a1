//! Lance-backed embedding cache keyed by `(content_hash, embedder_id)`.
//!
//! [`LanceCachedEmbedder`] consults the cache before calling the wrapped
//! embedder and writes misses through, so re-ingesting an unchanged protocol
//! costs no model time.
use anyhow::Result;
use arrow_array::{RecordBatch, StringArray, TimestampMillisecondArray};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Connection;
use std::collections::HashMap;
use std::sync::Arc;

use protoquery_core::error::CollaboratorError;
use protoquery_core::traits::Embedder;

use crate::schema::{build_cache_schema, content_hash};
use crate::table::{ensure_table, single_batch_reader, sql_literal, string_col, table_exists, vector_array, vector_at};

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub content_hash: String,
    pub embedder_id: String,
    pub vector: Vec<f32>,
}

pub async fn get_many(conn: &Connection, table: &str, embedder_id: &str, dim: usize, hashes: &[String]) -> Result<HashMap<String, Vec<f32>>> {
    let mut out = HashMap::new();
    if hashes.is_empty() || !table_exists(conn, table).await? { return Ok(out); }
    let t = conn.open_table(table).execute().await?;
    let list = hashes.iter().map(|h| sql_literal(h)).collect::<Vec<_>>().join(", ");
    let filter = format!("embedder_id = {} AND content_hash IN ({list})", sql_literal(embedder_id));
    let mut stream = t.query().only_if(filter).execute().await?;
    while let Some(batch) = stream.try_next().await? {
        let hash_col = string_col(&batch, "content_hash")?;
        for i in 0..batch.num_rows() {
            let vals = vector_at(&batch, i)?;
            if vals.len() == dim { out.insert(hash_col.value(i).to_string(), vals); }
        }
    }
    Ok(out)
}

pub async fn put_many(conn: &Connection, table: &str, dim: usize, entries: &[CacheEntry]) -> Result<()> {
    if entries.is_empty() { return Ok(()); }
    let t = ensure_table(conn, table, build_cache_schema(dim)).await?;
    let now = Utc::now().timestamp_millis();
    let vectors: Vec<&[f32]> = entries.iter().map(|e| e.vector.as_slice()).collect();
    let batch = RecordBatch::try_new(
        build_cache_schema(dim),
        vec![
            Arc::new(StringArray::from(entries.iter().map(|e| e.content_hash.clone()).collect::<Vec<_>>())),
            Arc::new(StringArray::from(entries.iter().map(|e| e.embedder_id.clone()).collect::<Vec<_>>())),
            Arc::new(TimestampMillisecondArray::from(vec![now; entries.len()])),
            Arc::new(vector_array(&vectors, dim)),
        ],
    )?;
    // Upsert: a hash may already be cached under this embedder
    let mut mi = t.merge_insert(&["content_hash", "embedder_id"]);
    mi.when_matched_update_all(None).when_not_matched_insert_all();
    mi.execute(single_batch_reader(batch)).await?;
    Ok(())
}

/// Content-hash cache in front of any [`Embedder`].
pub struct LanceCachedEmbedder {
    inner: Arc<dyn Embedder>,
    conn: Connection,
    table: String,
}

impl LanceCachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, conn: Connection, table: &str) -> Self {
        Self { inner, conn, table: table.to_string() }
    }
}

#[async_trait]
impl Embedder for LanceCachedEmbedder {
    fn embedder_id(&self) -> &str { self.inner.embedder_id() }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let eid = self.inner.embedder_id();
        let dim = self.inner.dim();
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();
        let mut cached = match get_many(&self.conn, &self.table, eid, dim, &hashes).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "embedding cache read failed; embedding everything");
                HashMap::new()
            }
        };

        let mut miss_texts = Vec::new();
        let mut miss_hashes = Vec::new();
        for (t, h) in texts.iter().zip(&hashes) {
            if !cached.contains_key(h) && !miss_hashes.contains(h) {
                miss_texts.push(t.clone());
                miss_hashes.push(h.clone());
            }
        }
        tracing::debug!(hits = texts.len() - miss_texts.len(), misses = miss_texts.len(), "embedding cache lookup");

        if !miss_texts.is_empty() {
            let fresh = self.inner.embed_batch(&miss_texts).await?;
            if fresh.len() != miss_texts.len() {
                return Err(CollaboratorError::Failed(format!("embedder returned {} vectors for {} texts", fresh.len(), miss_texts.len())));
            }
            let entries: Vec<CacheEntry> = miss_hashes
                .iter()
                .zip(&fresh)
                .filter(|(_, v)| v.len() == dim)
                .map(|(h, v)| CacheEntry { content_hash: h.clone(), embedder_id: eid.to_string(), vector: v.clone() })
                .collect();
            if let Err(e) = put_many(&self.conn, &self.table, dim, &entries).await {
                tracing::warn!(error = %e, "embedding cache write failed");
            }
            cached.extend(miss_hashes.into_iter().zip(fresh));
        }

        hashes
            .iter()
            .map(|h| cached.get(h).cloned().ok_or_else(|| CollaboratorError::Failed(format!("no embedding for content {h}"))))
            .collect()
    }
}
