//! LanceDB-backed [`ProtocolStore`].
//!
//! Chunks live in one table keyed by `"<protocol>:<ordinal>"`; a small
//! `protocols` table records what was ingested, when, and with which embedder.
//! Replacing a protocol is a single `merge_insert` that upserts the new rows
//! and deletes the protocol's rows missing from the new set, so readers of the
//! table never observe a half-written protocol.
use anyhow::{anyhow, Context, Result};
use arrow_array::{Int32Array, RecordBatch, StringArray, TimestampMillisecondArray};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use std::sync::Arc;

use protoquery_core::config::DataSettings;
use protoquery_core::traits::ProtocolStore;
use protoquery_core::types::{Chunk, Protocol, ProtocolId};

use crate::schema::{build_chunks_schema, build_protocols_schema, content_hash};
use crate::table::{ensure_table, i32_col, open_db, single_batch_reader, sql_literal, string_col, ts_col, vector_array, vector_at};

/// Summary row of the `protocols` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProtocol {
    pub protocol_id: ProtocolId,
    pub chunk_count: usize,
    pub embedder_id: String,
    pub ingested_at: DateTime<Utc>,
}

pub struct LanceProtocolStore {
    conn: Connection,
    dim: usize,
    embedder_id: String,
    chunks_table: String,
    protocols_table: String,
}

impl LanceProtocolStore {
    pub async fn open(uri: &str, dim: usize, embedder_id: &str, data: &DataSettings) -> Result<Self> {
        let conn = open_db(uri).await?;
        ensure_table(&conn, &data.chunks_table, build_chunks_schema(dim)).await?;
        ensure_table(&conn, &data.protocols_table, build_protocols_schema()).await?;
        Ok(Self {
            conn,
            dim,
            embedder_id: embedder_id.to_string(),
            chunks_table: data.chunks_table.clone(),
            protocols_table: data.protocols_table.clone(),
        })
    }

    pub fn connection(&self) -> &Connection { &self.conn }

    async fn chunks(&self) -> Result<Table> { Ok(self.conn.open_table(&self.chunks_table).execute().await?) }

    async fn protocols(&self) -> Result<Table> { Ok(self.conn.open_table(&self.protocols_table).execute().await?) }

    /// Every row of the `protocols` table, ordered by protocol id.
    pub async fn summaries(&self) -> Result<Vec<StoredProtocol>> {
        let mut out = self.read_summaries(None).await?;
        out.sort_by(|a, b| a.protocol_id.cmp(&b.protocol_id));
        Ok(out)
    }

    async fn read_summaries(&self, filter: Option<String>) -> Result<Vec<StoredProtocol>> {
        let t = self.protocols().await?;
        let mut q = t.query();
        if let Some(f) = filter { q = q.only_if(f); }
        let mut stream = q.execute().await?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            let ids = string_col(&batch, "protocol_id")?;
            let counts = i32_col(&batch, "chunk_count")?;
            let eids = string_col(&batch, "embedder_id")?;
            let times = ts_col(&batch, "ingested_at")?;
            for i in 0..batch.num_rows() {
                out.push(StoredProtocol {
                    protocol_id: ProtocolId::new(ids.value(i))?,
                    chunk_count: usize::try_from(counts.value(i)).unwrap_or(0),
                    embedder_id: eids.value(i).to_string(),
                    ingested_at: DateTime::from_timestamp_millis(times.value(i)).unwrap_or_default(),
                });
            }
        }
        Ok(out)
    }

    fn chunks_batch(&self, protocol: &Protocol) -> Result<RecordBatch> {
        let mut ids = Vec::new();
        let mut pids = Vec::new();
        let mut ordinals = Vec::new();
        let mut sections = Vec::new();
        let mut contents = Vec::new();
        let mut hashes = Vec::new();
        let mut vectors: Vec<&[f32]> = Vec::new();
        for c in &protocol.chunks {
            if c.embedding.len() != self.dim {
                return Err(anyhow!("chunk {} has dimension {}, table expects {}", c.chunk_ref(), c.embedding.len(), self.dim));
            }
            ids.push(c.chunk_ref().to_string());
            pids.push(c.protocol_id.to_string());
            ordinals.push(i32::try_from(c.ordinal)?);
            sections.push(c.section.clone());
            contents.push(c.text.clone());
            hashes.push(content_hash(&c.text));
            vectors.push(&c.embedding);
        }
        Ok(RecordBatch::try_new(
            build_chunks_schema(self.dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(pids)),
                Arc::new(Int32Array::from(ordinals)),
                Arc::new(StringArray::from(sections)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(hashes)),
                Arc::new(vector_array(&vectors, self.dim)),
            ],
        )?)
    }

    fn protocol_batch(&self, protocol: &Protocol) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            build_protocols_schema(),
            vec![
                Arc::new(StringArray::from(vec![protocol.id.to_string()])),
                Arc::new(Int32Array::from(vec![i32::try_from(protocol.chunks.len())?])),
                Arc::new(StringArray::from(vec![self.embedder_id.clone()])),
                Arc::new(TimestampMillisecondArray::from(vec![protocol.ingested_at.timestamp_millis()])),
            ],
        )?)
    }
}

fn protocol_predicate(id: &ProtocolId) -> String { format!("protocol_id = {}", sql_literal(id.as_str())) }

#[async_trait]
impl ProtocolStore for LanceProtocolStore {
    async fn list_protocols(&self) -> Result<Vec<ProtocolId>> {
        Ok(self.summaries().await?.into_iter().map(|s| s.protocol_id).collect())
    }

    async fn load_protocol(&self, id: &ProtocolId) -> Result<Option<Protocol>> {
        let pred = protocol_predicate(id);
        let Some(summary) = self.read_summaries(Some(pred.clone())).await?.into_iter().next() else {
            return Ok(None);
        };

        let t = self.chunks().await?;
        let mut stream = t.query().only_if(pred).execute().await?;
        let mut chunks = Vec::with_capacity(summary.chunk_count);
        while let Some(batch) = stream.try_next().await? {
            let ordinals = i32_col(&batch, "ordinal")?;
            let sections = string_col(&batch, "section")?;
            let contents = string_col(&batch, "content")?;
            for i in 0..batch.num_rows() {
                chunks.push(Chunk {
                    protocol_id: id.clone(),
                    ordinal: u32::try_from(ordinals.value(i)).context("negative ordinal in chunks table")?,
                    section: sections.value(i).to_string(),
                    text: contents.value(i).to_string(),
                    embedding: vector_at(&batch, i)?,
                });
            }
        }
        chunks.sort_by_key(|c| c.ordinal);
        // The chunks commit lands before the summary upsert, so a stale count is
        // a writer that died in between. The chunks table wins.
        if chunks.len() != summary.chunk_count {
            tracing::warn!(protocol = %id, listed = summary.chunk_count, stored = chunks.len(), "protocol summary is stale, using stored chunks");
        }
        Ok(Some(Protocol { id: id.clone(), chunks, ingested_at: summary.ingested_at }))
    }

    async fn replace_protocol(&self, protocol: &Protocol) -> Result<()> {
        let pred = protocol_predicate(&protocol.id);
        let chunks = self.chunks().await?;
        if protocol.chunks.is_empty() {
            chunks.delete(&pred).await?;
        } else {
            let batch = self.chunks_batch(protocol)?;
            let mut mi = chunks.merge_insert(&["id"]);
            mi.when_matched_update_all(None).when_not_matched_insert_all().when_not_matched_by_source_delete(Some(pred));
            mi.execute(single_batch_reader(batch)).await?;
        }

        let meta = self.protocols().await?;
        let mut mi = meta.merge_insert(&["protocol_id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(single_batch_reader(self.protocol_batch(protocol)?)).await?;
        tracing::info!(protocol = %protocol.id, chunks = protocol.chunks.len(), "stored protocol");
        Ok(())
    }

    async fn remove_protocol(&self, id: &ProtocolId) -> Result<bool> {
        let pred = protocol_predicate(id);
        let meta = self.protocols().await?;
        if meta.count_rows(Some(pred.clone())).await? == 0 {
            return Ok(false);
        }
        self.chunks().await?.delete(&pred).await?;
        meta.delete(&pred).await?;
        tracing::info!(protocol = %id, "removed protocol from store");
        Ok(true)
    }
}
