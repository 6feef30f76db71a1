mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ingestor, pid, protocol_with, CannedReasoner, DIM, PROTOCOL_TEXT};
use protoquery_core::config::{RankingConfig, RetrievalConfig};
use protoquery_core::criteria::{CriterionCategory, CriterionKind};
use protoquery_core::types::{ChunkRef, RankedResult};
use protoquery_core::{Error, ErrorKind};
use protoquery_embed::HashEmbedder;
use protoquery_hybrid::{build_context, Indexer, Orchestrator, ScenarioKind};

async fn setup(retrieval: RetrievalConfig) -> (Arc<Indexer>, Orchestrator) {
    let indexer = Arc::new(Indexer::new(DIM, true));
    ingestor(indexer.clone()).ingest_text(&pid("NCT01"), PROTOCOL_TEXT).await.unwrap();
    let orch = Orchestrator::new(indexer.clone(), RankingConfig::default(), retrieval, Arc::new(HashEmbedder::new(DIM))).unwrap();
    (indexer, orch)
}

#[test]
fn scenarios_are_classified_by_keyword() {
    assert_eq!(ScenarioKind::classify("Patient has a history of hepatitis B"), ScenarioKind::Eligibility);
    assert_eq!(ScenarioKind::classify("a grade 3 adverse reaction occurs"), ScenarioKind::Safety);
    assert_eq!(ScenarioKind::classify("we reduce the dose to 100 mg"), ScenarioKind::Dosing);
    assert_eq!(ScenarioKind::classify("the subject misses a visit"), ScenarioKind::Procedure);
    assert_eq!(ScenarioKind::classify("the subject wants to withdraw"), ScenarioKind::Discontinuation);
    assert_eq!(ScenarioKind::classify("the sponsor changes"), ScenarioKind::General);
}

#[tokio::test]
async fn what_if_answers_from_cited_evidence() {
    let (_, orch) = setup(RetrievalConfig::default()).await;
    let reasoner = Arc::new(CannedReasoner::new(
        "```json\n{\"answer\": \"The patient is excluded by criterion 1.\", \"citations\": [\"NCT01:4\"]}\n```",
    ));
    let orch = orch.with_reasoner(reasoner.clone());

    let out = orch.what_if("patient has a history of hepatitis B?", &pid("NCT01")).await.unwrap();
    assert_eq!(out.kind, ScenarioKind::Eligibility);
    assert_eq!(out.answer.citations, vec![ChunkRef::new(pid("NCT01"), 4)]);
    assert_eq!(out.evidence.len(), 7);
    assert_eq!(out.evidence[0], ChunkRef::new(pid("NCT01"), 4));

    let request = reasoner.last.lock().clone().unwrap();
    assert_eq!(request.question, "What if patient has a history of hepatitis B?");
    assert!(request.context.starts_with("## Relevant Protocol Sections\n"));
    assert!(request.context.contains("\n### 1. [NCT01:4] exclusion criteria\n"));
    assert!(request.system.contains("eligibility"));
}

#[tokio::test]
async fn missing_or_malformed_reasoning_is_unavailable() {
    let (_, orch) = setup(RetrievalConfig::default()).await;
    let err = orch.what_if("patient misses a visit", &pid("NCT01")).await.unwrap_err();
    assert!(matches!(err, Error::ReasoningUnavailable { .. }));

    let orch = orch.with_reasoner(Arc::new(CannedReasoner::new("The patient should be excluded.")));
    let err = orch.what_if("patient misses a visit", &pid("NCT01")).await.unwrap_err();
    assert!(matches!(err, Error::ReasoningUnavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
}

#[tokio::test]
async fn citation_outside_the_evidence_is_rejected() {
    let (_, orch) = setup(RetrievalConfig::default()).await;
    let orch = orch.with_reasoner(Arc::new(CannedReasoner::new("{\"answer\": \"x\", \"citations\": [\"NCT01:99\"]}")));
    let err = orch.what_if("patient misses a visit", &pid("NCT01")).await.unwrap_err();
    assert!(matches!(err, Error::ReasoningUnavailable { .. }));
}

#[tokio::test]
async fn slow_reasoning_times_out() {
    let retrieval = RetrievalConfig { reasoning_timeout_ms: 50, ..RetrievalConfig::default() };
    let (_, orch) = setup(retrieval).await;
    let orch = orch.with_reasoner(Arc::new(CannedReasoner::slow(Duration::from_secs(5))));
    let started = std::time::Instant::now();
    let err = orch.what_if("an adverse reaction occurs", &pid("NCT01")).await.unwrap_err();
    assert!(matches!(err, Error::ReasoningUnavailable { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn empty_protocol_has_no_evidence() {
    let (indexer, orch) = setup(RetrievalConfig::default()).await;
    indexer.ingest(protocol_with("EMPTY", &[])).unwrap();
    let orch = orch.with_reasoner(Arc::new(CannedReasoner::new("{\"answer\": \"x\"}")));
    let err = orch.what_if("patient misses a visit", &pid("EMPTY")).await.unwrap_err();
    assert!(matches!(err, Error::NoEvidence { .. }));

    let err = orch.what_if("patient misses a visit", &pid("NOPE")).await.unwrap_err();
    assert!(matches!(err, Error::ProtocolNotFound(_)));
}

#[tokio::test]
async fn context_budget_smaller_than_one_chunk_is_a_config_error() {
    let retrieval = RetrievalConfig { context_token_budget: 5, ..RetrievalConfig::default() };
    let (_, orch) = setup(retrieval).await;
    let orch = orch.with_reasoner(Arc::new(CannedReasoner::new("{\"answer\": \"x\"}")));
    let err = orch.what_if("patient misses a visit", &pid("NCT01")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

fn ranked(ordinals: &[u32]) -> Vec<RankedResult> {
    ordinals
        .iter()
        .enumerate()
        .map(|(i, &o)| RankedResult {
            chunk: ChunkRef::new(pid("P"), o),
            fused_score: 1.0 / (61.0 + i as f64),
            lexical_rank: Some(i as u32 + 1),
            vector_rank: None,
            lexical_score: Some(1.0),
            vector_score: None,
        })
        .collect()
}

#[test]
fn tight_budget_keeps_the_best_ranked_prefix() {
    let indexer = Indexer::new(3, true);
    let rows = [
        ("safety", "report promptly", vec![1.0, 0.0, 0.0]),
        ("safety", "grade events", vec![0.0, 1.0, 0.0]),
        ("safety", "notify sponsor", vec![0.0, 0.0, 1.0]),
    ];
    indexer.ingest(protocol_with("P", &rows)).unwrap();
    let snapshot = indexer.snapshot();

    // header is 5 tokens and each entry 8, so 25 admits two entries
    let ctx = build_context(&snapshot, &ranked(&[2, 0, 1]), &[], 25).unwrap();
    assert_eq!(ctx.refs, vec![ChunkRef::new(pid("P"), 2), ChunkRef::new(pid("P"), 0)]);
    assert!(ctx.text.contains("\n### 1. [P:2] safety\nnotify sponsor\n"));
    assert!(ctx.text.contains("\n### 2. [P:0] safety\nreport promptly\n"));
    assert!(!ctx.text.contains("[P:1]"));
    assert!(ctx.criteria.is_empty());

    let all = build_context(&snapshot, &ranked(&[2, 0, 1]), &[], 1000).unwrap();
    assert_eq!(all.refs.len(), 3);
}

#[tokio::test]
async fn what_if_lists_the_criteria_a_scenario_touches() {
    let (_, orch) = setup(RetrievalConfig::default()).await;
    let reasoner = Arc::new(CannedReasoner::new("{\"answer\": \"Excluded.\", \"citations\": [\"NCT01:4\"]}"));
    let orch = orch.with_reasoner(reasoner.clone());

    let out = orch.what_if("patient has a history of hepatitis B", &pid("NCT01")).await.unwrap();
    assert_eq!(out.affected_criteria.len(), 5);
    let top = &out.affected_criteria[0];
    assert_eq!((top.kind, top.number, top.chunk.ordinal), (CriterionKind::Exclusion, 1, 4));

    let context = reasoner.last.lock().clone().unwrap().context;
    assert!(context.contains("\n## Potentially Affected Eligibility Criteria\n- **Exclusion #1** [NCT01:4]: Active hepatitis B or hepatitis C infection.\n"));
    let sections = context.find("## Relevant Protocol Sections").unwrap();
    let criteria = context.find("## Potentially Affected Eligibility Criteria").unwrap();
    assert!(sections < criteria);
}

#[tokio::test]
async fn eligibility_lists_criteria_by_type_then_number() {
    let (_, orch) = setup(RetrievalConfig::default()).await;
    let all = orch.eligibility(&pid("NCT01"), None).unwrap();
    let rows: Vec<(CriterionKind, u32, u32)> = all.iter().map(|c| (c.kind, c.number, c.chunk.ordinal)).collect();
    assert_eq!(
        rows,
        [
            (CriterionKind::Inclusion, 1, 1),
            (CriterionKind::Inclusion, 2, 2),
            (CriterionKind::Inclusion, 3, 3),
            (CriterionKind::Exclusion, 1, 4),
            (CriterionKind::Exclusion, 2, 5),
        ]
    );
    assert_eq!(all[0].text, "Age 18 years or older at screening.");
    assert_eq!(all[0].category, Some(CriterionCategory::Demographic));
    assert_eq!(all[4].category, Some(CriterionCategory::PriorTreatment));

    let inclusion = orch.eligibility(&pid("NCT01"), Some(CriterionKind::Inclusion)).unwrap();
    assert_eq!(inclusion.len(), 3);
    assert!(matches!(orch.eligibility(&pid("NOPE"), None), Err(Error::ProtocolNotFound(_))));
}
