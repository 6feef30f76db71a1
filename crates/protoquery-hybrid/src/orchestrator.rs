//! Query-time orchestration: search and what-if reasoning.
//!
//! Every call resolves one snapshot up front and uses it for ranking and for
//! resolving chunk text, so a concurrent re-ingest never mixes versions into
//! one answer.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use protoquery_core::answer::{ReasoningRequest, StructuredAnswer};
use protoquery_core::chunker::estimate_tokens;
use protoquery_core::config::{AlignmentThresholds, RankingConfig, RetrievalConfig};
use protoquery_core::criteria::{criteria, Criterion, CriterionKind, EXCLUSION_SECTION, INCLUSION_SECTION};
use protoquery_core::error::{Error, Result};
use protoquery_core::traits::{Embedder, Reasoner};
use protoquery_core::types::{ChunkRef, ProtocolId, RankedResult, SearchFilter, SearchHit};

use crate::align::{ComparisonReport, ProtocolAligner};
use crate::calls::{embed_with_retry, reason_once};
use crate::catalog::{CorpusSnapshot, Indexer};
use crate::ranker::{HybridRanker, Scope};

/// Coarse scenario type used to frame a what-if question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    Eligibility,
    Safety,
    Dosing,
    Procedure,
    Discontinuation,
    General,
}

impl ScenarioKind {
    /// First matching keyword family wins.
    pub fn classify(scenario: &str) -> Self {
        let s = scenario.to_lowercase();
        let any = |terms: &[&str]| terms.iter().any(|t| s.contains(t));
        if any(&["eligible", "qualify", "criteria", "patient has", "history of", "diagnosis"]) {
            Self::Eligibility
        } else if any(&["adverse", "side effect", "safety", "toxicity", "reaction"]) {
            Self::Safety
        } else if any(&["dose", "dosing", "schedule", "frequency", "mg", "modify"]) {
            Self::Dosing
        } else if any(&["visit", "miss", "appointment", "procedure", "skip"]) {
            Self::Procedure
        } else if any(&["withdraw", "discontinue", "stop", "terminate"]) {
            Self::Discontinuation
        } else {
            Self::General
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eligibility => "eligibility",
            Self::Safety => "safety",
            Self::Dosing => "dosing",
            Self::Procedure => "procedure",
            Self::Discontinuation => "discontinuation",
            Self::General => "general",
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Eligibility => "State clearly whether the scenario affects eligibility and which criteria decide it.",
            Self::Safety => "Highlight any monitoring, reporting or actions the protocol requires.",
            Self::Dosing => "Point to the dosing rules and any permitted modifications.",
            Self::Procedure => "Describe the visit or procedure rules and any allowed windows.",
            Self::Discontinuation => "Describe the withdrawal or discontinuation rules and follow-up obligations.",
            Self::General => "Identify which protocol requirements are relevant.",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

const WHAT_IF_SYSTEM: &str = "You are a clinical research expert analyzing \"what if\" scenarios for clinical trial protocols. \
Explain the implications using only the protocol text provided, cite the excerpts you rely on, \
and note where the protocol gives no clear guidance.";

fn system_prompt(kind: ScenarioKind) -> String {
    format!("{WHAT_IF_SYSTEM}\nScenario type: {kind}. {}", kind.focus())
}

/// How many eligibility chunks a what-if scenario is checked against.
const AFFECTED_CRITERIA_K: usize = 10;

/// Evidence block handed to the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceContext {
    pub text: String,
    pub refs: Vec<ChunkRef>,
    /// Criteria listed under the affected-criteria heading, in the order given.
    pub criteria: Vec<Criterion>,
}

/// Render the highest-ranked chunks that fit in `budget` estimated tokens,
/// then as many of `affected` as still fit under their own heading.
/// Lower-ranked chunks are dropped first; if even the best chunk does not fit
/// the budget is unusable and the call fails with `InvalidConfig`.
pub fn build_context(snapshot: &CorpusSnapshot, ranked: &[RankedResult], affected: &[Criterion], budget: usize) -> Result<EvidenceContext> {
    let mut text = String::from("## Relevant Protocol Sections\n");
    let mut refs = Vec::new();
    for (i, r) in ranked.iter().enumerate() {
        let chunk = snapshot.chunk(&r.chunk).ok_or_else(|| Error::Consistency(format!("ranked chunk {} missing from its snapshot", r.chunk)))?;
        let entry = format!("\n### {}. [{}] {}\n{}\n", i + 1, r.chunk, chunk.section, chunk.text);
        if estimate_tokens(&text) + estimate_tokens(&entry) > budget {
            break;
        }
        text.push_str(&entry);
        refs.push(r.chunk.clone());
    }
    if refs.is_empty() && !ranked.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "retrieval.context_token_budget ({budget}) is too small for the top-ranked chunk {}",
            ranked[0].chunk
        )));
    }

    let mut listed = Vec::new();
    let mut block = String::from("\n## Potentially Affected Eligibility Criteria\n");
    for c in affected {
        let line = format!("{}\n", c.bullet());
        if estimate_tokens(&text) + estimate_tokens(&block) + estimate_tokens(&line) > budget {
            break;
        }
        block.push_str(&line);
        if !refs.contains(&c.chunk) {
            refs.push(c.chunk.clone());
        }
        listed.push(c.clone());
    }
    if !listed.is_empty() {
        text.push_str(&block);
    }
    Ok(EvidenceContext { text, refs, criteria: listed })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfAnswer {
    pub scenario: String,
    pub protocol_id: ProtocolId,
    pub kind: ScenarioKind,
    pub answer: StructuredAnswer,
    /// Chunks supplied to the reasoning service, best first.
    pub evidence: Vec<ChunkRef>,
    /// Inclusion or exclusion criteria closest to the scenario.
    pub affected_criteria: Vec<Criterion>,
    pub generation: u64,
}

pub struct Orchestrator {
    indexer: Arc<Indexer>,
    ranker: HybridRanker,
    embedder: Arc<dyn Embedder>,
    reasoner: Option<Arc<dyn Reasoner>>,
    retrieval: RetrievalConfig,
}

impl Orchestrator {
    pub fn new(indexer: Arc<Indexer>, ranking: RankingConfig, retrieval: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self { indexer, ranker: HybridRanker::new(ranking)?, embedder, reasoner: None, retrieval })
    }

    pub fn with_reasoner(mut self, reasoner: Arc<dyn Reasoner>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn indexer(&self) -> &Arc<Indexer> { &self.indexer }

    pub fn ranker(&self) -> &HybridRanker { &self.ranker }

    async fn embed_query(&self, text: &str, context: &str) -> Result<Vec<f32>> {
        let mut v = embed_with_retry(self.embedder.as_ref(), &[text.to_string()], self.indexer.dim(), self.retrieval.embed_timeout(), context).await?;
        v.pop().ok_or_else(|| Error::EmbeddingUnavailable { context: context.to_string(), reason: "no vector returned".to_string() })
    }

    /// Hybrid search within `filter`; an empty protocol list means the whole corpus.
    pub async fn search(&self, query: &str, filter: &SearchFilter, k: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("search query must not be empty".to_string()));
        }
        let snapshot = self.indexer.snapshot();
        let protocols: Vec<ProtocolId> =
            if filter.protocols.is_empty() { snapshot.protocol_ids().cloned().collect() } else { filter.protocols.clone() };
        for id in &protocols {
            snapshot.require(id)?;
        }
        if protocols.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embed_query(query, "search query").await?;
        let scope = Scope { protocols: &protocols, sections: &filter.sections };
        let ranked = self.ranker.rank(&snapshot, query, &embedding, scope, k)?;
        ranked
            .into_iter()
            .map(|result| {
                let chunk = snapshot
                    .chunk(&result.chunk)
                    .ok_or_else(|| Error::Consistency(format!("ranked chunk {} missing from its snapshot", result.chunk)))?;
                Ok(SearchHit { section: chunk.section.clone(), content: chunk.text.clone(), result })
            })
            .collect()
    }

    /// Answer "what if <scenario>?" from one protocol's evidence.
    pub async fn what_if(&self, scenario: &str, protocol_id: &ProtocolId) -> Result<WhatIfAnswer> {
        let scenario = scenario.trim();
        if scenario.is_empty() {
            return Err(Error::InvalidInput("scenario must not be empty".to_string()));
        }
        let snapshot = self.indexer.snapshot();
        let protocol = snapshot.require(protocol_id)?;
        if protocol.chunks().is_empty() {
            return Err(Error::NoEvidence { protocol_id: protocol_id.to_string(), query: scenario.to_string() });
        }
        let Some(reasoner) = self.reasoner.as_ref() else {
            return Err(Error::ReasoningUnavailable { context: "what-if".to_string(), reason: "no reasoning service configured".to_string() });
        };

        let kind = ScenarioKind::classify(scenario);
        let embedding = self.embed_query(scenario, "what-if scenario").await?;
        let scope_ids = [protocol_id.clone()];
        let ranked = self.ranker.rank(&snapshot, scenario, &embedding, Scope::protocols(&scope_ids), self.retrieval.what_if_top_k)?;
        if ranked.is_empty() {
            return Err(Error::NoEvidence { protocol_id: protocol_id.to_string(), query: scenario.to_string() });
        }

        let affected = self.affected_criteria(&snapshot, protocol_id, scenario, &embedding)?;
        let evidence = build_context(&snapshot, &ranked, &affected, self.retrieval.context_token_budget)?;
        let request = ReasoningRequest {
            system: system_prompt(kind),
            question: format!("What if {}?", scenario.trim_end_matches('?')),
            context: evidence.text,
        };
        tracing::debug!(protocol = %protocol_id, %kind, evidence = evidence.refs.len(), criteria = evidence.criteria.len(), "what-if request");
        let raw = reason_once(reasoner.as_ref(), &request, self.retrieval.reasoning_timeout(), "what-if").await?;
        let answer = StructuredAnswer::parse(&raw, &evidence.refs)
            .map_err(|reason| Error::ReasoningUnavailable { context: "what-if: malformed answer".to_string(), reason })?;

        Ok(WhatIfAnswer {
            scenario: scenario.to_string(),
            protocol_id: protocol_id.clone(),
            kind,
            answer,
            evidence: evidence.refs,
            affected_criteria: evidence.criteria,
            generation: snapshot.generation(),
        })
    }

    /// Criteria of `protocol_id` ranked against the scenario, best first.
    fn affected_criteria(&self, snapshot: &CorpusSnapshot, protocol_id: &ProtocolId, scenario: &str, embedding: &[f32]) -> Result<Vec<Criterion>> {
        let all = criteria(snapshot.require(protocol_id)?.chunks(), None);
        if all.is_empty() {
            return Ok(Vec::new());
        }
        let ids = [protocol_id.clone()];
        let sections = [INCLUSION_SECTION.to_string(), EXCLUSION_SECTION.to_string()];
        let ranked = self.ranker.rank(snapshot, scenario, embedding, Scope { protocols: &ids, sections: &sections }, AFFECTED_CRITERIA_K)?;
        Ok(ranked.iter().filter_map(|r| all.iter().find(|c| c.chunk == r.chunk).cloned()).collect())
    }

    /// Inclusion and exclusion criteria of one protocol, ordered by type then
    /// number. `kind` narrows to one type.
    pub fn eligibility(&self, protocol_id: &ProtocolId, kind: Option<CriterionKind>) -> Result<Vec<Criterion>> {
        let snapshot = self.indexer.snapshot();
        Ok(criteria(snapshot.require(protocol_id)?.chunks(), kind))
    }

    /// Align two protocols as they stand in the current snapshot.
    pub fn compare(&self, a: &ProtocolId, b: &ProtocolId, thresholds: AlignmentThresholds) -> Result<ComparisonReport> {
        ProtocolAligner::new(thresholds)?.compare(&self.indexer.snapshot(), a, b)
    }
}
