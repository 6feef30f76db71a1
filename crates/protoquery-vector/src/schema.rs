use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

fn vector_field(dim: usize) -> Field {
    Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true)
}

/// One row per chunk; `id` is `"<protocol>:<ordinal>"`.
pub fn build_chunks_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("protocol_id", DataType::Utf8, false),
        Field::new("ordinal", DataType::Int32, false),
        Field::new("section", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("content_hash", DataType::Utf8, false),
        vector_field(dim),
    ]))
}

pub fn build_protocols_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("protocol_id", DataType::Utf8, false),
        Field::new("chunk_count", DataType::Int32, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("ingested_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

pub fn build_cache_schema(dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("content_hash", DataType::Utf8, false),
        Field::new("embedder_id", DataType::Utf8, false),
        Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        vector_field(dim),
    ]))
}

pub fn content_hash(s: &str) -> String { blake3::hash(s.as_bytes()).to_hex().to_string() }
