//! Core engine: wires the fact store, graph index, analyzer passes, quality
//! gate and report synthesizer into one run per change set.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::context::{HistorySignals, NoHistory};
use crate::critic::{GateOutcome, QualityGate};
use crate::error::EngineError;
use crate::facts::FactStore;
use crate::graph::{changed_symbols, GraphIndex, NoUsageSearch, UsageSearch};
use crate::orchestrator::Orchestrator;
use crate::passes::{standard_passes, AnalysisArtifact, AnalyzerPass, PassContext};
use crate::report::{synthesize, BreakingChange, FinalReport, RunMetadata};

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
  pub report: FinalReport,
  pub artifacts: Vec<AnalysisArtifact>,
  pub outcome: GateOutcome,
}

/// The change-risk engine. Stateless between runs.
pub struct Engine {
  config: Arc<Config>,
  usage: Arc<dyn UsageSearch>,
  history: Arc<dyn HistorySignals>,
  passes: Vec<Arc<dyn AnalyzerPass>>,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    Self {
      config: Arc::new(config),
      usage: Arc::new(NoUsageSearch),
      history: Arc::new(NoHistory),
      passes: standard_passes(),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  pub fn with_usage_search(mut self, usage: Arc<dyn UsageSearch>) -> Self {
    self.usage = usage;
    self
  }

  pub fn with_history(mut self, history: Arc<dyn HistorySignals>) -> Self {
    self.history = history;
    self
  }

  /// Replace the standard risk/observability/configuration passes.
  pub fn with_passes(mut self, passes: Vec<Arc<dyn AnalyzerPass>>) -> Self {
    self.passes = passes;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Analyze one change set.
  ///
  /// Fails only when the configuration is invalid, pass ids collide, or no
  /// fact document is valid. In every other case a report is produced, with
  /// degradation recorded in its metadata.
  pub async fn analyze(&self, change_set: &str, documents: &[serde_json::Value]) -> Result<RunOutput, EngineError> {
    self.config.validate()?;
    let orchestrator = Orchestrator::with_passes(self.passes.clone(), Duration::from_millis(self.config.pass_timeout_ms))?;

    info!(change_set, documents = documents.len(), "analysis started");
    let store = FactStore::load(documents)?;
    let symbols = changed_symbols(&store);
    let graph = GraphIndex::build(&store, &symbols, self.usage.as_ref(), &self.config);

    let mut input_degradation: Vec<String> = store.degraded().to_vec();
    input_degradation.extend(graph.degraded().iter().cloned());
    let changed_files = store.changed_files();
    let breaking: Vec<BreakingChange> = store
      .unmitigated_breaking_changes()
      .into_iter()
      .map(|(file, change)| BreakingChange {
        file: file.to_string(),
        symbol: change.symbol.clone(),
      })
      .collect();
    let files_analyzed = store.facts().len();
    let skipped_documents = store.degraded().len();

    let ctx = PassContext {
      store: Arc::new(store),
      graph: Arc::new(graph),
      history: Arc::clone(&self.history),
      config: Arc::clone(&self.config),
    };
    let artifacts = orchestrator.run(ctx).await;

    let outcome = QualityGate::new(&self.config).reconcile(&artifacts, &changed_files, breaking.len());
    let metadata = RunMetadata::new(change_set, &artifacts, &input_degradation, files_analyzed, skipped_documents);
    let report = synthesize(&outcome, breaking, metadata);

    info!(
      change_set,
      risk_score = report.risk_score,
      risk_level = report.risk_level.as_str(),
      decision = ?report.merge_decision,
      findings = report.total_findings(),
      degraded = report.metadata.degraded,
      "analysis finished"
    );
    Ok(RunOutput {
      report,
      artifacts,
      outcome,
    })
  }
}
