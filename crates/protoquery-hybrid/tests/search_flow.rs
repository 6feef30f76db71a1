mod common;

use std::sync::Arc;

use common::{ingestor, pid, ConstantEmbedder, DIM, PROTOCOL_TEXT};
use protoquery_core::config::{RankingConfig, RetrievalConfig};
use protoquery_core::types::{ChunkRef, SearchFilter};
use protoquery_core::{Error, ErrorKind};
use protoquery_embed::HashEmbedder;
use protoquery_hybrid::{Indexer, Orchestrator};

const SECOND_TEXT: &str = "An open label study of nivolumab in lung cancer.

INCLUSION CRITERIA
1. Age 18 years or older.
2. Confirmed non small cell lung cancer.

SAFETY
Adverse events are graded with CTCAE version 5.
";

async fn corpus() -> Arc<Indexer> {
    let indexer = Arc::new(Indexer::new(DIM, true));
    let ing = ingestor(indexer.clone());
    ing.ingest_text(&pid("NCT01"), PROTOCOL_TEXT).await.unwrap();
    ing.ingest_text(&pid("NCT02"), SECOND_TEXT).await.unwrap();
    indexer
}

fn orchestrator(indexer: Arc<Indexer>, ranking: RankingConfig) -> Orchestrator {
    Orchestrator::new(indexer, ranking, RetrievalConfig::default(), Arc::new(HashEmbedder::new(DIM))).unwrap()
}

#[tokio::test]
async fn top_in_both_lists_is_top_overall() {
    let orch = orchestrator(corpus().await, RankingConfig::default());
    let hits = orch.search("hepatitis infection", &SearchFilter::default(), 5).await.unwrap();
    let top = &hits[0];
    assert_eq!(top.result.chunk, ChunkRef::new(pid("NCT01"), 4));
    assert_eq!(top.result.lexical_rank, Some(1));
    assert_eq!(top.result.vector_rank, Some(1));
    assert!((top.result.fused_score - 2.0 / 61.0).abs() < 1e-9);
    assert_eq!(top.section, "exclusion criteria");
}

#[tokio::test]
async fn lexical_match_is_recalled_without_vector_signal() {
    let indexer = Arc::new(Indexer::new(DIM, true));
    let ing = protoquery_hybrid::Ingestor::new(
        Default::default(),
        Arc::new(protoquery_core::extract::PlainTextExtractor),
        Arc::new(ConstantEmbedder { dim: DIM }),
        indexer.clone(),
        RetrievalConfig::default(),
    );
    ing.ingest_text(&pid("NCT01"), PROTOCOL_TEXT).await.unwrap();
    let orch = Orchestrator::new(indexer, RankingConfig::default(), RetrievalConfig::default(), Arc::new(ConstantEmbedder { dim: DIM })).unwrap();

    let hits = orch.search("RECIST", &SearchFilter::default(), 3).await.unwrap();
    assert_eq!(hits[0].result.chunk.ordinal, 2);
    assert_eq!(hits[0].result.lexical_rank, Some(1));
    assert!(hits[0].content.contains("RECIST"));
}

#[tokio::test]
async fn results_follow_the_total_order_and_are_repeatable() {
    let orch = orchestrator(corpus().await, RankingConfig::default());
    let first = orch.search("adverse events age", &SearchFilter::default(), 20).await.unwrap();
    let second = orch.search("adverse events age", &SearchFilter::default(), 20).await.unwrap();
    assert_eq!(first, second);
    for w in first.windows(2) {
        assert!(w[0].result.fused_score >= w[1].result.fused_score);
    }
    let mut refs: Vec<_> = first.iter().map(|h| h.result.chunk.clone()).collect();
    refs.dedup();
    assert_eq!(refs.len(), first.len());
}

#[tokio::test]
async fn filters_restrict_protocols_and_sections() {
    let orch = orchestrator(corpus().await, RankingConfig::default());
    let filter = SearchFilter::protocol(pid("NCT02")).with_sections(vec!["Safety".to_string()]);
    let hits = orch.search("adverse events", &filter, 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].result.chunk, ChunkRef::new(pid("NCT02"), 3));
    assert_eq!(hits[0].section, "safety");
}

#[tokio::test]
async fn k_is_capped_and_zero_yields_nothing() {
    let ranking = RankingConfig { max_results: 2, ..RankingConfig::default() };
    let orch = orchestrator(corpus().await, ranking);
    assert_eq!(orch.search("age", &SearchFilter::default(), 100).await.unwrap().len(), 2);
    assert!(orch.search("age", &SearchFilter::default(), 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let orch = orchestrator(corpus().await, RankingConfig::default());
    let err = orch.search("  ", &SearchFilter::default(), 5).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);

    let err = orch.search("age", &SearchFilter::protocol(pid("NCT99")), 5).await.unwrap_err();
    assert!(matches!(err, Error::ProtocolNotFound(ref id) if id == "NCT99"));
}

#[tokio::test]
async fn empty_corpus_returns_no_results() {
    let orch = orchestrator(Arc::new(Indexer::new(DIM, true)), RankingConfig::default());
    assert!(orch.search("age", &SearchFilter::default(), 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn query_embedding_dimension_is_checked() {
    let indexer = corpus().await;
    let orch = orchestrator(indexer.clone(), RankingConfig::default());
    let snapshot = indexer.snapshot();
    let ids = [pid("NCT01")];
    let err = orch.ranker().rank(&snapshot, "age", &[1.0, 0.0], protoquery_hybrid::Scope::protocols(&ids), 5).unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: DIM, actual: 2, .. }));
}

#[tokio::test]
async fn inline_labelled_criteria_are_searchable_by_section() {
    let indexer = Arc::new(Indexer::new(DIM, true));
    ingestor(indexer.clone()).ingest_text(&pid("NCT03"), "Inclusion: age ≥ 18\nExclusion: pregnant").await.unwrap();
    let orch = orchestrator(indexer, RankingConfig::default());

    let hits = orch.search("age requirement", &SearchFilter::default(), 5).await.unwrap();
    assert_eq!(hits[0].result.chunk, ChunkRef::new(pid("NCT03"), 0));
    assert_eq!(hits[0].section, "inclusion criteria");
    let exclusion = hits.iter().find(|h| h.result.chunk.ordinal == 1).map(|h| h.section.as_str());
    assert!(exclusion.map_or(true, |s| s == "exclusion criteria"));
}
