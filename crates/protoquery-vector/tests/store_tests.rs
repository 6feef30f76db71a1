use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use protoquery_core::config::DataSettings;
use protoquery_core::error::CollaboratorError;
use protoquery_core::traits::{Embedder, ProtocolStore};
use protoquery_core::types::{Chunk, Protocol, ProtocolId};
use protoquery_vector::{cosine, LanceCachedEmbedder, LanceProtocolStore, VectorIndex};

const DIM: usize = 4;

fn protocol(id: &str, texts: &[&str]) -> Protocol {
    let pid = ProtocolId::new(id).unwrap();
    let chunks = texts
        .iter()
        .enumerate()
        .map(|(i, t)| Chunk {
            protocol_id: pid.clone(),
            ordinal: i as u32,
            section: if i == 0 { "unlabeled".into() } else { "inclusion criteria".into() },
            text: t.to_string(),
            embedding: vec![i as f32 + 1.0, 0.5, 0.0, -1.0],
        })
        .collect();
    Protocol { id: pid, chunks, ingested_at: chrono::Utc::now() }
}

#[test]
fn cosine_edges() {
    assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
}

#[test]
fn vector_index_rejects_wrong_dimensions() {
    let mut p = protocol("P", &["a", "b"]);
    assert!(VectorIndex::build(DIM, &p.chunks).is_ok());
    p.chunks[1].embedding.pop();
    assert!(VectorIndex::build(DIM, &p.chunks).is_err());

    let idx = VectorIndex::build(DIM, &p.chunks[..1]).unwrap();
    assert!(idx.search(&[1.0, 0.0]).is_err());
}

#[test]
fn vector_index_orders_by_similarity_then_ordinal() {
    let pid = ProtocolId::new("P").unwrap();
    let mk = |ordinal: u32, embedding: Vec<f32>| Chunk { protocol_id: pid.clone(), ordinal, section: "unlabeled".into(), text: String::new(), embedding };
    let chunks = vec![mk(0, vec![0.0, 1.0]), mk(1, vec![1.0, 0.0]), mk(2, vec![2.0, 0.0])];
    let idx = VectorIndex::build(2, &chunks).unwrap();
    let hits = idx.search(&[1.0, 0.0]).unwrap();
    let order: Vec<u32> = hits.iter().map(|h| h.0).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert_eq!(idx.embedding(2), Some(&[2.0, 0.0][..]));
}

#[tokio::test]
async fn replace_load_and_remove_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceProtocolStore::open(&uri, DIM, "test:d4", &DataSettings::default()).await?;

    let first = protocol("NCT-1", &["Overview.", "Adults only.", "Consent required."]);
    store.replace_protocol(&first).await?;
    store.replace_protocol(&protocol("NCT-2", &["Other protocol."])).await?;

    let loaded = store.load_protocol(&first.id).await?.expect("stored");
    assert_eq!(loaded.chunks, first.chunks);
    assert_eq!(loaded.ingested_at.timestamp_millis(), first.ingested_at.timestamp_millis());

    // re-ingest with fewer chunks drops the stale rows
    let second = protocol("NCT-1", &["Overview v2.", "Adults and adolescents."]);
    store.replace_protocol(&second).await?;
    let reloaded = store.load_protocol(&second.id).await?.expect("stored");
    assert_eq!(reloaded.chunks.len(), 2);
    assert_eq!(reloaded.chunks[1].text, "Adults and adolescents.");

    let ids: Vec<String> = store.list_protocols().await?.iter().map(|p| p.to_string()).collect();
    assert_eq!(ids, vec!["NCT-1", "NCT-2"]);

    assert!(store.remove_protocol(&second.id).await?);
    assert!(!store.remove_protocol(&second.id).await?);
    assert!(store.load_protocol(&second.id).await?.is_none());
    assert!(store.load_protocol(&ProtocolId::new("NCT-2")?).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn zero_chunk_protocol_is_stored() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceProtocolStore::open(&tmp.path().to_string_lossy(), DIM, "test:d4", &DataSettings::default()).await?;
    let empty = protocol("EMPTY", &[]);
    store.replace_protocol(&empty).await?;
    let loaded = store.load_protocol(&empty.id).await?.expect("stored");
    assert!(loaded.chunks.is_empty());
    Ok(())
}

#[tokio::test]
async fn stale_summary_does_not_hide_committed_chunks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceProtocolStore::open(&uri, DIM, "test:d4", &DataSettings::default()).await?;
    // shares the chunks table but writes its summaries elsewhere, like a
    // writer that died between the two commits
    let partial = DataSettings { protocols_table: "protocols_alt".into(), ..DataSettings::default() };
    let other = LanceProtocolStore::open(&uri, DIM, "test:d4", &partial).await?;

    store.replace_protocol(&protocol("NCT-1", &["Overview.", "Adults only.", "Consent required."])).await?;
    other.replace_protocol(&protocol("NCT-1", &["Overview v2.", "Adults and adolescents."])).await?;

    let loaded = store.load_protocol(&ProtocolId::new("NCT-1")?).await?.expect("stored");
    let texts: Vec<&str> = loaded.chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, ["Overview v2.", "Adults and adolescents."]);
    assert_eq!(store.summaries().await?[0].chunk_count, 3);
    Ok(())
}

struct CountingEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn embedder_id(&self) -> &str { "counting:d4" }
    fn dim(&self) -> usize { DIM }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0, 0.0]).collect())
    }
}

#[tokio::test]
async fn cached_embedder_only_embeds_misses() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let conn = protoquery_vector::table::open_db(&tmp.path().to_string_lossy()).await?;
    let inner = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0), texts: AtomicUsize::new(0) });
    let cached = LanceCachedEmbedder::new(inner.clone(), conn, "emb_cache");

    let batch = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
    let first = cached.embed_batch(&batch).await?;
    assert_eq!(first.len(), 3);
    assert_eq!(first[0], first[2]);
    assert_eq!(inner.texts.load(Ordering::SeqCst), 2);

    let second = cached.embed_batch(&["beta".to_string(), "gamma".to_string()]).await?;
    assert_eq!(second[0], first[1]);
    assert_eq!(inner.texts.load(Ordering::SeqCst), 3);
    assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    Ok(())
}
