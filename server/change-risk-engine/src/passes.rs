//! Analyzer passes: named, independent consumers of the shared fact store and
//! graph index. Each produces one [`AnalysisArtifact`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::context::{Contextualizer, HistorySignals};
use crate::error::EngineError;
use crate::facts::FactStore;
use crate::finding::{Finding, Pattern};
use crate::graph::GraphIndex;
use crate::rules::Detector;

pub const RISK_PASS: &str = "risk";
pub const OBSERVABILITY_PASS: &str = "observability";
pub const CONFIGURATION_PASS: &str = "configuration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassStatus {
  Ok,
  /// Completed, but some findings were judged against a degraded blast radius.
  Partial,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisArtifact {
  pub pass: String,
  pub status: PassStatus,
  pub findings: Vec<Finding>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl AnalysisArtifact {
  /// Empty placeholder for a pass that failed or timed out.
  pub fn failed(pass: &str, error: &EngineError) -> Self {
    Self {
      pass: pass.to_string(),
      status: PassStatus::Failed,
      findings: Vec::new(),
      error: Some(error.to_string()),
    }
  }
}

/// Read-only inputs shared by every pass in a run.
#[derive(Clone)]
pub struct PassContext {
  pub store: Arc<FactStore>,
  pub graph: Arc<GraphIndex>,
  pub history: Arc<dyn HistorySignals>,
  pub config: Arc<Config>,
}

pub trait AnalyzerPass: Send + Sync {
  /// Unique id; also the artifact slot the pass writes.
  fn id(&self) -> &str;

  fn run(&self, ctx: &PassContext) -> Result<AnalysisArtifact, EngineError>;
}

/// A pass driven by a subset of the rule templates.
#[derive(Debug, Clone)]
pub struct RulePass {
  id: String,
  detector: Detector,
}

impl RulePass {
  pub fn new(id: impl Into<String>, detector: Detector) -> Self {
    Self {
      id: id.into(),
      detector,
    }
  }

  /// Resilience, messaging and compatibility risks.
  pub fn risk() -> Self {
    use Pattern::*;
    Self::new(
      RISK_PASS,
      Detector::only(&[
        HttpCallWithoutTimeout,
        RetryWithoutCircuitBreaker,
        FireAndForgetWithoutConfirmation,
        AsyncPublishWithoutTimeout,
        ConsumerWithoutDlq,
        WebhookWithoutRetry,
        NoIdempotencyWithAtLeastOnce,
        BlockingInAsyncHandler,
        ConsumerExternalCallWithoutCircuitBreaker,
        MessageSchemaBreakingChange,
        BreakingPublicApiChange,
      ]),
    )
  }

  /// Failures that would go unnoticed or be hard to diagnose.
  pub fn observability() -> Self {
    use Pattern::*;
    Self::new(
      OBSERVABILITY_PASS,
      Detector::only(&[
        ExternalCallWithoutErrorHandling,
        FireAndForgetWithoutConfirmation,
        ConsumerWithoutDlq,
        AutoAckWithoutErrorHandling,
        RedundantRetryInConsumer,
      ]),
    )
  }

  pub fn configuration() -> Self {
    use Pattern::*;
    Self::new(
      CONFIGURATION_PASS,
      Detector::only(&[
        ConfigPoolSizeLargeDelta,
        ConfigTimeoutDisabled,
        DependencyMajorVersionChange,
      ]),
    )
  }
}

impl AnalyzerPass for RulePass {
  fn id(&self) -> &str {
    &self.id
  }

  fn run(&self, ctx: &PassContext) -> Result<AnalysisArtifact, EngineError> {
    let raw = self.detector.detect_all(&ctx.store, &ctx.config);
    let contextualizer = Contextualizer::new(&ctx.store, &ctx.graph, ctx.history.as_ref(), &ctx.config);

    let mut partial = false;
    let findings: Vec<Finding> = raw
      .iter()
      .map(|f| {
        partial |= contextualizer.used_degraded_radius(f);
        let mut adjusted = contextualizer.apply(f);
        adjusted.sources = vec![self.id.clone()];
        adjusted
      })
      .collect();

    debug!(pass = %self.id, findings = findings.len(), partial, "pass produced findings");
    Ok(AnalysisArtifact {
      pass: self.id.clone(),
      status: if partial { PassStatus::Partial } else { PassStatus::Ok },
      findings,
      error: None,
    })
  }
}

/// The risk, observability and configuration passes.
pub fn standard_passes() -> Vec<Arc<dyn AnalyzerPass>> {
  vec![
    Arc::new(RulePass::risk()),
    Arc::new(RulePass::observability()),
    Arc::new(RulePass::configuration()),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::NoHistory;
  use crate::graph::{changed_symbols, NoUsageSearch, StaticUsageIndex, UsageLocation, UsageResult};
  use serde_json::json;

  fn context(docs: Vec<serde_json::Value>, usage: Option<StaticUsageIndex>) -> PassContext {
    let store = FactStore::load(&docs).unwrap();
    let config = Config::default();
    let symbols = changed_symbols(&store);
    let graph = match usage {
      Some(index) => GraphIndex::build(&store, &symbols, &index, &config),
      None => GraphIndex::build(&store, &symbols, &NoUsageSearch, &config),
    };
    PassContext {
      store: Arc::new(store),
      graph: Arc::new(graph),
      history: Arc::new(NoHistory),
      config: Arc::new(config),
    }
  }

  fn owner_service() -> serde_json::Value {
    json!({
      "file": "src/OwnerService.java",
      "language": "java",
      "calls": [{"line": 42, "receiver_type": "RestTemplate", "method": "getForObject",
                 "category": "http", "is_blocking": true, "enclosing_method": "findVets",
                 "resource": "http://vets/api"}]
    })
  }

  #[test]
  fn risk_pass_contextualizes_with_fan_in() {
    let mut usage = StaticUsageIndex::default();
    usage.insert(
      "findVets",
      UsageResult {
        usage_count: 340,
        locations: vec![UsageLocation {
          file: "src/web/VetController.java".into(),
          line: Some(10),
        }],
      },
    );
    let ctx = context(vec![owner_service()], Some(usage));
    let artifact = RulePass::risk().run(&ctx).unwrap();
    assert_eq!(artifact.status, PassStatus::Ok);
    assert_eq!(artifact.findings.len(), 1);
    let f = &artifact.findings[0];
    assert_eq!(f.base_severity, crate::finding::Severity::Medium);
    assert_eq!(f.severity, crate::finding::Severity::Critical);
    assert_eq!(f.sources, vec!["risk".to_string()]);
  }

  #[test]
  fn unavailable_usage_search_marks_pass_partial() {
    let ctx = context(vec![owner_service()], None);
    let artifact = RulePass::risk().run(&ctx).unwrap();
    assert_eq!(artifact.status, PassStatus::Partial);
    assert_eq!(artifact.findings[0].severity, crate::finding::Severity::Medium);
  }

  #[test]
  fn pass_without_findings_is_ok_even_when_degraded() {
    let ctx = context(vec![owner_service()], None);
    let artifact = RulePass::configuration().run(&ctx).unwrap();
    assert_eq!(artifact.status, PassStatus::Ok);
    assert!(artifact.findings.is_empty());
  }

  #[test]
  fn standard_pass_ids_are_unique() {
    let ids: Vec<String> = standard_passes().iter().map(|p| p.id().to_string()).collect();
    assert_eq!(ids, vec!["risk", "observability", "configuration"]);
  }

  #[test]
  fn failed_placeholder_is_empty() {
    let err = EngineError::pass_failure("risk", "boom");
    let artifact = AnalysisArtifact::failed("risk", &err);
    assert_eq!(artifact.status, PassStatus::Failed);
    assert!(artifact.findings.is_empty());
    assert!(artifact.error.unwrap().contains("boom"));
  }
}
