use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use walkdir::WalkDir;

use protoquery_cli::{init_tracing, load_settings, protocol_id_for, App};
use protoquery_core::extract::PlainTextExtractor;

/// Bulk-ingest a directory of protocol text files into the local store.
#[derive(Parser)]
#[command(name = "protoquery-indexer", version)]
struct Args {
    /// Directory to scan recursively
    data_dir: PathBuf,
    /// Stop after this many files
    #[arg(long)]
    limit: Option<usize>,
    /// Stop at the first failed protocol instead of skipping it
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(false);
    let app = App::open(load_settings()?).await?;
    let ingestor = app.ingestor()?;

    let mut files: Vec<PathBuf> = WalkDir::new(&args.data_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && PlainTextExtractor::supports(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    if let Some(limit) = args.limit {
        println!("🔢 Limiting to {limit} files");
        files.truncate(limit);
    }
    println!("Protocol indexer\n================");
    println!("Data directory: {} ({} files)", args.data_dir.display(), files.len());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")?);
    let (mut chunks, mut failed) = (0usize, 0usize);
    for path in &files {
        let id = protocol_id_for(path)?;
        pb.set_message(id.to_string());
        match ingestor.ingest_file(&id, path).await {
            Ok(report) => chunks += report.chunks,
            Err(e) if args.strict || e.is_fatal() => {
                pb.abandon();
                return Err(e.into());
            }
            Err(e) => {
                failed += 1;
                pb.println(format!("⚠️  {}: {e}", path.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    println!("\n✅ Indexing completed");
    println!("📊 {} protocols, {chunks} chunks, {failed} skipped", files.len() - failed);
    println!("💡 To search, use: cargo run --bin protoquery -- search '<query>'");
    Ok(())
}
