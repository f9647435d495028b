//! Binary entrypoint: read fact documents, write one FinalReport JSON to stdout.
//!
//! Facts are a JSON array or JSON lines, from `--facts` or stdin. Logs go to
//! stderr (`RUST_LOG`, default `info`). Exit code 1 on a fatal run error,
//! 2 on bad arguments. The process does not wait for passes that timed out.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use change_risk_engine::context::StaticHistory;
use change_risk_engine::facts::parse_documents;
use change_risk_engine::graph::StaticUsageIndex;
use change_risk_engine::orchestrator::block_on_detached;
use change_risk_engine::output::ArtifactWriter;
use change_risk_engine::{Config, Engine, EngineError};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "change-risk-engine")]
#[command(about = "Score production risk of a change set from extracted code facts", long_about = None)]
#[command(version)]
struct Cli {
  /// Fact documents (JSON array or JSON lines); `-` reads stdin
  #[arg(long, default_value = "-")]
  facts: String,

  /// Change-set identifier used in the report and the artifact directory
  #[arg(long = "change-set", default_value = "local")]
  change_set: String,

  /// Persist per-pass artifacts and the final report under this directory
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Engine config JSON; missing keys keep their defaults
  #[arg(long)]
  config: Option<PathBuf>,

  /// Pre-computed usage index JSON (symbol -> {usage_count, locations})
  #[arg(long)]
  usage: Option<PathBuf>,

  /// History signals JSON (file -> {commits, rollbacks, requests_per_minute})
  #[arg(long)]
  history: Option<PathBuf>,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();
  let result = block_on_detached(run(cli)).and_then(|r| r);
  if let Err(e) = result {
    let _ = writeln!(io::stderr(), "change-risk-engine: {}", e);
    std::process::exit(1);
  }
}

async fn run(cli: Cli) -> Result<(), EngineError> {
  let config = match &cli.config {
    Some(path) => Config::load(path)?,
    None => Config::default(),
  };

  let mut engine = Engine::new(config);
  if let Some(path) = &cli.usage {
    engine = engine.with_usage_search(Arc::new(StaticUsageIndex::from_json(&read_text(path)?)?));
  }
  if let Some(path) = &cli.history {
    engine = engine.with_history(Arc::new(StaticHistory::from_json(&read_text(path)?)?));
  }

  let raw = if cli.facts == "-" {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    buf
  } else {
    read_text(Path::new(&cli.facts))?
  };
  let documents = parse_documents(&raw)?;

  let out = engine.analyze(&cli.change_set, &documents).await?;

  if let Some(root) = &cli.output {
    ArtifactWriter::new(root).write(&out.report, &out.artifacts, chrono::Utc::now())?;
  }

  let stdout = io::stdout();
  let mut w = io::BufWriter::new(stdout.lock());
  serde_json::to_writer(&mut w, &out.report)?;
  writeln!(w)?;
  w.flush()?;
  Ok(())
}

fn read_text(path: &Path) -> Result<String, EngineError> {
  Ok(std::fs::read_to_string(path)?)
}
