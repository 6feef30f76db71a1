//! protoquery-hybrid
//!
//! The retrieval engine: snapshot-published indexes, BM25 + cosine ranking
//! fused with RRF, what-if orchestration, cross-protocol alignment and the
//! ingestion pipeline feeding them.
pub mod align;
pub mod calls;
pub mod catalog;
pub mod fusion;
pub mod ingest;
pub mod orchestrator;
pub mod ranker;

pub use align::{ComparisonReport, ComparisonSummary, ProtocolAligner};
pub use catalog::{CorpusSnapshot, Indexer, ProtocolSnapshot};
pub use ingest::{restore, IngestReport, Ingestor};
pub use orchestrator::{build_context, EvidenceContext, Orchestrator, ScenarioKind, WhatIfAnswer};
pub use ranker::{HybridRanker, Scope};
