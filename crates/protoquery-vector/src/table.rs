//! LanceDB connection and housekeeping helpers.
use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, RecordBatchReader, StringArray, TimestampMillisecondArray};
use lancedb::{connect, Connection, Table};
use std::sync::Arc;

pub async fn open_db(uri: &str) -> Result<Connection> {
    Ok(connect(uri).execute().await?)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn.table_names().execute().await?.iter().any(|n| n == name))
}

/// Opens `name`, creating it empty with `schema` on first use.
pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<arrow_schema::Schema>) -> Result<Table> {
    if !table_exists(conn, name).await? {
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
        conn.create_table(name, Box::new(iter)).execute().await?;
    }
    Ok(conn.open_table(name).execute().await?)
}

/// Quote a value for a Lance SQL predicate.
pub fn sql_literal(s: &str) -> String { format!("'{}'", s.replace('\'', "''")) }

pub fn single_batch_reader(batch: RecordBatch) -> Box<dyn RecordBatchReader + Send> {
    let schema = batch.schema();
    Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema))
}

pub(crate) fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<StringArray>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn i32_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch.column_by_name(name).and_then(|c| c.as_any().downcast_ref::<Int32Array>()).ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn ts_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a TimestampMillisecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

pub(crate) fn vector_at(batch: &RecordBatch, i: usize) -> Result<Vec<f32>> {
    let col = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| anyhow!("vector column missing"))?;
    if col.is_null(i) { return Ok(Vec::new()); }
    let list = col.value(i);
    Ok(list.as_primitive::<arrow_array::types::Float32Type>().values().iter().copied().collect())
}

pub(crate) fn vector_array(vectors: &[&[f32]], dim: usize) -> FixedSizeListArray {
    let items: Vec<Option<Vec<Option<f32>>>> = vectors.iter().map(|v| Some(v.iter().map(|&x| Some(x)).collect())).collect();
    FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(items.into_iter(), dim as i32)
}
