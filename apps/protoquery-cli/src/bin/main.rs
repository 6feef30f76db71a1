use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use protoquery_cli::{init_tracing, load_settings, masked, protocol_id_for, App};
use protoquery_core::config::AlignmentThresholds;
use protoquery_core::criteria::{Criterion, CriterionKind};
use protoquery_core::types::{ProtocolId, SearchFilter};
use protoquery_hybrid::{ComparisonReport, WhatIfAnswer};

#[derive(Parser)]
#[command(name = "protoquery", version, about = "Hybrid retrieval, what-if reasoning and comparison over clinical-trial protocols")]
struct Cli {
    /// Debug-level logging (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one protocol text file; the protocol id defaults to the file stem
    Ingest {
        path: PathBuf,
        #[arg(long)]
        id: Option<String>,
    },
    /// Ingest every .txt/.md file under a directory
    IngestDir { dir: PathBuf },
    /// Hybrid search across the corpus
    Search {
        query: String,
        #[arg(short, long = "protocol")]
        protocols: Vec<String>,
        #[arg(short, long = "section")]
        sections: Vec<String>,
        #[arg(short = 'k', long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Ask what a scenario would mean under one protocol
    WhatIf {
        protocol: String,
        scenario: String,
        #[arg(long)]
        json: bool,
    },
    /// List a protocol's inclusion and exclusion criteria
    Eligibility {
        protocol: String,
        /// all, inclusion or exclusion
        #[arg(short, long = "type", default_value = "all")]
        kind: String,
        #[arg(long)]
        json: bool,
    },
    /// Align the sections of two protocols
    Compare {
        a: String,
        b: String,
        #[arg(long)]
        high: Option<f32>,
        #[arg(long)]
        low: Option<f32>,
        #[arg(long)]
        json: bool,
    },
    /// List stored protocols
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a protocol from the store and the index
    Remove { protocol: String },
    /// Print the effective configuration (API key masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let settings = load_settings()?;

    if matches!(cli.command, Command::Config) {
        println!("{}", serde_json::to_string_pretty(&masked(&settings))?);
        return Ok(());
    }

    let app = App::open(settings).await?;
    match cli.command {
        Command::Ingest { path, id } => {
            let id = match id {
                Some(id) => ProtocolId::new(id)?,
                None => protocol_id_for(&path)?,
            };
            let report = app.ingestor()?.ingest_file(&id, &path).await?;
            println!("✅ Ingested {} ({} chunks, generation {})", report.protocol_id, report.chunks, report.generation);
        }
        Command::IngestDir { dir } => {
            let ingestor = app.ingestor()?;
            let mut ok = 0usize;
            for entry in walkdir::WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if !entry.file_type().is_file() || !protoquery_core::extract::PlainTextExtractor::supports(path) {
                    continue;
                }
                let id = protocol_id_for(path)?;
                match ingestor.ingest_file(&id, path).await {
                    Ok(r) => {
                        ok += 1;
                        println!("  {} ({} chunks)", r.protocol_id, r.chunks);
                    }
                    Err(e) if !e.is_fatal() => eprintln!("  ⚠️  {}: {e}", path.display()),
                    Err(e) => return Err(e.into()),
                }
            }
            println!("✅ Ingested {ok} protocols from {}", dir.display());
        }
        Command::Search { query, protocols, sections, limit, json } => {
            let orch = app.orchestrator()?;
            let filter = SearchFilter { protocols: protocols.into_iter().map(ProtocolId::new).collect::<Result<_, _>>()?, sections: Vec::new() }
                .with_sections(sections);
            let k = limit.unwrap_or(app.settings.ranking.default_results);
            let hits = orch.search(&query, &filter, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, h) in hits.iter().enumerate() {
                    let r = &h.result;
                    let rank = |x: Option<u32>| x.map_or("-".to_string(), |v| v.to_string());
                    println!("{}. [{}] {}  score={:.4} (lexical #{}, vector #{})", i + 1, r.chunk, h.section, r.fused_score, rank(r.lexical_rank), rank(r.vector_rank));
                    println!("   {}", preview(&h.content, 200));
                }
            }
        }
        Command::WhatIf { protocol, scenario, json } => {
            let answer = app.orchestrator()?.what_if(&scenario, &ProtocolId::new(protocol)?).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_what_if(&answer);
            }
        }
        Command::Eligibility { protocol, kind, json } => {
            let kind = match kind.trim().to_lowercase().as_str() {
                "all" => None,
                other => Some(other.parse::<CriterionKind>()?),
            };
            let criteria = app.orchestrator()?.eligibility(&ProtocolId::new(protocol)?, kind)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&criteria)?);
            } else {
                print_criteria(&criteria);
            }
        }
        Command::Compare { a, b, high, low, json } => {
            let defaults = app.settings.alignment;
            let thresholds = AlignmentThresholds::new(high.unwrap_or(defaults.high), low.unwrap_or(defaults.low))?;
            let report = app.orchestrator()?.compare(&ProtocolId::new(a)?, &ProtocolId::new(b)?, thresholds)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_comparison(&report);
            }
        }
        Command::List { json } => {
            let rows = app.store.summaries().await?;
            if json {
                let out: Vec<_> = rows
                    .iter()
                    .map(|r| serde_json::json!({
                        "protocol_id": r.protocol_id,
                        "chunk_count": r.chunk_count,
                        "embedder_id": r.embedder_id,
                        "ingested_at": r.ingested_at.to_rfc3339(),
                    }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if rows.is_empty() {
                println!("No protocols stored.");
            } else {
                for r in rows {
                    println!("{:<24} {:>5} chunks  {}  {}", r.protocol_id, r.chunk_count, r.embedder_id, r.ingested_at.format("%Y-%m-%d %H:%M"));
                }
            }
        }
        Command::Remove { protocol } => {
            let id = ProtocolId::new(protocol)?;
            app.ingestor()?.remove(&id).await?;
            println!("🗑️  Removed {id}");
        }
        // printed before the store is opened
        Command::Config => {}
    }
    Ok(())
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}…")
}

fn print_what_if(a: &WhatIfAnswer) {
    println!("What if {}? [{}] ({} scenario)\n", a.scenario.trim_end_matches('?'), a.protocol_id, a.kind);
    println!("{}\n", a.answer.answer);
    if !a.answer.citations.is_empty() {
        let cites: Vec<String> = a.answer.citations.iter().map(ToString::to_string).collect();
        println!("Citations: {}", cites.join(", "));
    }
    if !a.affected_criteria.is_empty() {
        println!("Potentially affected criteria:");
        for c in &a.affected_criteria {
            println!("  {} #{} [{}] {}", c.kind, c.number, c.chunk, preview(&c.text, 120));
        }
    }
    println!("Evidence considered: {} chunks (generation {})", a.evidence.len(), a.generation);
}

fn print_criteria(criteria: &[Criterion]) {
    if criteria.is_empty() {
        println!("No eligibility criteria found.");
        return;
    }
    let mut current = None;
    for c in criteria {
        if current != Some(c.kind) {
            current = Some(c.kind);
            println!("\n{} criteria", c.kind);
        }
        let category = c.category.map_or("-", |x| x.as_str());
        println!("{:>3}. {}  ({category})", c.number, preview(&c.text, 150));
    }
}

fn print_comparison(r: &ComparisonReport) {
    let s = &r.summary;
    println!("{} vs {} (high {:.2}, low {:.2})", r.protocol_a, r.protocol_b, r.thresholds.high, r.thresholds.low);
    println!("equivalent {}  modified {}  added-in-A {}  added-in-B {}\n", s.equivalent, s.modified, s.added_in_a, s.added_in_b);
    let show = |x: &Option<protoquery_core::types::ChunkRef>| x.as_ref().map_or("-".to_string(), ToString::to_string);
    for p in &r.pairs {
        println!("{:<12} {:>16} {:>16}  {:.3}", p.classification.as_str(), show(&p.a), show(&p.b), p.similarity);
    }
}
