//! Report Synthesizer: a pure projection of the gate outcome into the final
//! report, plus a Markdown rendering of it.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::critic::{GateOutcome, MergeDecision};
use crate::finding::{Confidence, Finding, Severity};
use crate::passes::{AnalysisArtifact, PassStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
  Low,
  Medium,
  High,
  Critical,
}

impl RiskLevel {
  /// LOW 0-30, MEDIUM 31-60, HIGH 61-80, CRITICAL 81-100.
  pub fn from_score(score: u32) -> Self {
    match score {
      0..=30 => Self::Low,
      31..=60 => Self::Medium,
      61..=80 => Self::High,
      _ => Self::Critical,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Low => "LOW",
      Self::Medium => "MEDIUM",
      Self::High => "HIGH",
      Self::Critical => "CRITICAL",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
  pub pass: String,
  pub status: PassStatus,
  pub findings: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
  pub change_set: String,
  pub degraded: bool,
  pub degraded_reasons: Vec<String>,
  /// HIGH when clean, MEDIUM when degraded, LOW when a pass FAILED.
  pub confidence: Confidence,
  pub passes: Vec<PassSummary>,
  pub files_analyzed: usize,
  pub skipped_documents: usize,
}

impl RunMetadata {
  /// Derive run confidence from input degradation and pass outcomes.
  pub fn new(
    change_set: &str,
    artifacts: &[AnalysisArtifact],
    input_degradation: &[String],
    files_analyzed: usize,
    skipped_documents: usize,
  ) -> Self {
    let mut reasons: Vec<String> = input_degradation.to_vec();
    for a in artifacts {
      match a.status {
        PassStatus::Ok => {}
        PassStatus::Partial => reasons.push(format!("pass {} ran against a degraded blast radius", a.pass)),
        PassStatus::Failed => reasons.push(
          a.error
            .clone()
            .unwrap_or_else(|| format!("pass {} failed", a.pass)),
        ),
      }
    }

    let confidence = if artifacts.iter().any(|a| a.status == PassStatus::Failed) {
      Confidence::Low
    } else if !reasons.is_empty() {
      Confidence::Medium
    } else {
      Confidence::High
    };

    Self {
      change_set: change_set.to_string(),
      degraded: !reasons.is_empty(),
      degraded_reasons: reasons,
      confidence,
      passes: artifacts
        .iter()
        .map(|a| PassSummary {
          pass: a.pass.clone(),
          status: a.status,
          findings: a.findings.len(),
          error: a.error.clone(),
        })
        .collect(),
      files_analyzed,
      skipped_documents,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
  pub critical: usize,
  pub high: usize,
  pub medium: usize,
  pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityGroup {
  pub severity: Severity,
  pub count: usize,
  pub findings: Vec<Finding>,
}

/// A breaking API or schema change that carries no migration note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
  pub file: String,
  pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
  pub risk_score: u32,
  pub risk_level: RiskLevel,
  pub merge_decision: MergeDecision,
  pub counts: SeverityCounts,
  /// Non-empty groups, CRITICAL first.
  pub findings: Vec<SeverityGroup>,
  pub filtered_false_positives: usize,
  pub resolved_contradictions: usize,
  pub merged_duplicates: usize,
  pub rejected_invalid: usize,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub unmitigated_breaking_changes: Vec<BreakingChange>,
  pub metadata: RunMetadata,
}

impl FinalReport {
  pub fn total_findings(&self) -> usize {
    self.findings.iter().map(|g| g.count).sum()
  }

  pub fn findings_at(&self, severity: Severity) -> &[Finding] {
    self
      .findings
      .iter()
      .find(|g| g.severity == severity)
      .map(|g| g.findings.as_slice())
      .unwrap_or(&[])
  }
}

pub fn synthesize(outcome: &GateOutcome, breaking: Vec<BreakingChange>, metadata: RunMetadata) -> FinalReport {
  let mut counts = SeverityCounts::default();
  let mut groups = Vec::new();

  for severity in Severity::ALL.into_iter().rev() {
    let mut findings: Vec<Finding> = outcome
      .findings
      .iter()
      .filter(|f| f.severity == severity)
      .cloned()
      .collect();
    findings.sort_by(|a, b| {
      a.location
        .cmp(&b.location)
        .then(a.pattern.cmp(&b.pattern))
    });

    let count = findings.len();
    match severity {
      Severity::Critical => counts.critical = count,
      Severity::High => counts.high = count,
      Severity::Medium => counts.medium = count,
      Severity::Low => counts.low = count,
    }
    if count > 0 {
      groups.push(SeverityGroup {
        severity,
        count,
        findings,
      });
    }
  }

  FinalReport {
    risk_score: outcome.risk_score,
    risk_level: RiskLevel::from_score(outcome.risk_score),
    merge_decision: outcome.merge_decision,
    counts,
    findings: groups,
    filtered_false_positives: outcome.filtered_false_positives,
    resolved_contradictions: outcome.resolved_contradictions,
    merged_duplicates: outcome.merged_duplicates,
    rejected_invalid: outcome.rejected_invalid,
    unmitigated_breaking_changes: breaking,
    metadata,
  }
}

fn decision_label(decision: MergeDecision) -> &'static str {
  match decision {
    MergeDecision::RequestChanges => "REQUEST_CHANGES",
    MergeDecision::ApproveWithTests => "APPROVE_WITH_TESTS",
    MergeDecision::Approve => "APPROVE",
  }
}

fn confidence_label(confidence: Confidence) -> &'static str {
  match confidence {
    Confidence::Low => "LOW",
    Confidence::Medium => "MEDIUM",
    Confidence::High => "HIGH",
  }
}

/// Deterministic Markdown view of a report. Writing to a `String` cannot fail.
pub fn render_markdown(report: &FinalReport) -> String {
  let mut md = String::new();
  let meta = &report.metadata;

  let _ = writeln!(md, "# Change risk report: {}", meta.change_set);
  let _ = writeln!(md);
  let _ = writeln!(md, "| Risk score | Risk level | Decision | Confidence |");
  let _ = writeln!(md, "|---|---|---|---|");
  let _ = writeln!(
    md,
    "| {} | {} | {} | {} |",
    report.risk_score,
    report.risk_level.as_str(),
    decision_label(report.merge_decision),
    confidence_label(meta.confidence)
  );
  let _ = writeln!(md);
  let _ = writeln!(
    md,
    "Findings: {} critical, {} high, {} medium, {} low. Filtered false positives: {}. Resolved contradictions: {}.",
    report.counts.critical,
    report.counts.high,
    report.counts.medium,
    report.counts.low,
    report.filtered_false_positives,
    report.resolved_contradictions
  );

  if meta.degraded {
    let _ = writeln!(md);
    let _ = writeln!(md, "> **Degraded run.** Results may be incomplete:");
    for reason in &meta.degraded_reasons {
      let _ = writeln!(md, "> - {}", reason);
    }
  }

  if !report.unmitigated_breaking_changes.is_empty() {
    let _ = writeln!(md);
    let _ = writeln!(md, "## Breaking changes without migration notes");
    let _ = writeln!(md);
    for b in &report.unmitigated_breaking_changes {
      let _ = writeln!(md, "- `{}` in `{}`", b.symbol, b.file);
    }
  }

  for group in &report.findings {
    let _ = writeln!(md);
    let _ = writeln!(md, "## {} ({})", group.severity.as_str(), group.count);
    for f in &group.findings {
      let _ = writeln!(md);
      let line = f.location.line.map(|l| l.to_string()).unwrap_or_else(|| "?".into());
      let _ = writeln!(md, "### `{}` at {}:{}", f.pattern.as_str(), f.location.file, line);
      let _ = writeln!(md);
      let _ = writeln!(md, "- **Impact:** {}", f.impact);
      let _ = writeln!(md, "- **Recommendation:** {}", f.recommendation);
      let _ = writeln!(md, "- **Confidence:** {}", confidence_label(f.confidence));
      if !f.test_needed.is_empty() {
        let tests: Vec<String> = f
          .test_needed
          .iter()
          .map(|t| serde_json::to_value(t).ok().and_then(|v| v.as_str().map(String::from)).unwrap_or_default())
          .collect();
        let _ = writeln!(md, "- **Tests needed:** {}", tests.join(", "));
      }
      if !f.adjustments.is_empty() {
        let _ = writeln!(
          md,
          "- **Severity:** {} -> {} ({})",
          f.base_severity.as_str(),
          f.severity.as_str(),
          f.adjustments.join(", ")
        );
      }
    }
  }

  let _ = writeln!(md);
  let _ = writeln!(md, "## Passes");
  let _ = writeln!(md);
  for p in &meta.passes {
    let status = serde_json::to_value(p.status)
      .ok()
      .and_then(|v| v.as_str().map(String::from))
      .unwrap_or_default();
    let _ = writeln!(md, "- {}: {} ({} findings)", p.pass, status, p.findings);
  }
  md
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::critic::{risk_score, merge_decision};
  use crate::finding::{FindingType, Location, Pattern};
  use pretty_assertions::assert_eq;

  fn f(file: &str, line: u32, severity: Severity) -> Finding {
    let mut f = Finding::new(
      FindingType::Configuration,
      Pattern::ConfigPoolSizeLargeDelta,
      severity,
      Location::new(file, Some(line)),
      Confidence::High,
    )
    .with_text("Pool grows 5x.", "Load test the new pool size.");
    f.severity = severity;
    f
  }

  fn outcome(findings: Vec<Finding>) -> GateOutcome {
    GateOutcome {
      risk_score: risk_score(&findings),
      merge_decision: merge_decision(&findings, 0),
      findings,
      discarded: Vec::new(),
      rejected_invalid: 0,
      filtered_false_positives: 2,
      downgraded: 0,
      merged_duplicates: 0,
      resolved_contradictions: 1,
    }
  }

  fn artifact(pass: &str, status: PassStatus) -> AnalysisArtifact {
    AnalysisArtifact {
      pass: pass.into(),
      status,
      findings: Vec::new(),
      error: None,
    }
  }

  #[test]
  fn risk_level_boundaries_are_exact() {
    assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(30), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(31), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(60), RiskLevel::Medium);
    assert_eq!(RiskLevel::from_score(61), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(80), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(81), RiskLevel::Critical);
    assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
  }

  #[test]
  fn groups_by_severity_with_counts() {
    let meta = RunMetadata::new("pr-1", &[artifact("risk", PassStatus::Ok)], &[], 1, 0);
    let report = synthesize(
      &outcome(vec![f("b.yml", 2, Severity::Medium), f("a.yml", 1, Severity::Medium), f("a.yml", 9, Severity::High)]),
      Vec::new(),
      meta,
    );
    assert_eq!(report.risk_score, 31);
    assert_eq!(report.risk_level, RiskLevel::Medium);
    assert_eq!(report.merge_decision, MergeDecision::ApproveWithTests);
    assert_eq!(
      report.counts,
      SeverityCounts {
        critical: 0,
        high: 1,
        medium: 2,
        low: 0
      }
    );
    assert_eq!(report.findings.len(), 2);
    assert_eq!(report.findings[0].severity, Severity::High);
    assert_eq!(report.findings_at(Severity::Medium)[0].location.file, "a.yml");
    assert_eq!(report.filtered_false_positives, 2);
    assert_eq!(report.resolved_contradictions, 1);
    assert_eq!(report.total_findings(), 3);
  }

  #[test]
  fn run_confidence_reflects_degradation() {
    let clean = RunMetadata::new("c", &[artifact("risk", PassStatus::Ok)], &[], 1, 0);
    assert_eq!((clean.confidence, clean.degraded), (Confidence::High, false));

    let skipped = RunMetadata::new("c", &[artifact("risk", PassStatus::Ok)], &["document 2 invalid".into()], 1, 1);
    assert_eq!((skipped.confidence, skipped.degraded), (Confidence::Medium, true));

    let partial = RunMetadata::new("c", &[artifact("risk", PassStatus::Partial)], &[], 1, 0);
    assert_eq!(partial.confidence, Confidence::Medium);

    let failed = RunMetadata::new(
      "c",
      &[artifact("risk", PassStatus::Ok), artifact("configuration", PassStatus::Failed)],
      &[],
      1,
      0,
    );
    assert_eq!(failed.confidence, Confidence::Low);
    assert_eq!(failed.degraded_reasons, vec!["pass configuration failed".to_string()]);
  }

  #[test]
  fn markdown_lists_header_and_findings() {
    let meta = RunMetadata::new("pr-7", &[artifact("configuration", PassStatus::Ok)], &[], 1, 0);
    let report = synthesize(&outcome(vec![f("application.yml", 4, Severity::Medium)]), Vec::new(), meta);
    let md = render_markdown(&report);
    assert!(md.starts_with("# Change risk report: pr-7\n"));
    assert!(md.contains("| 8 | LOW | APPROVE | HIGH |"));
    assert!(md.contains("## MEDIUM (1)"));
    assert!(md.contains("### `config_pool_size_large_delta` at application.yml:4"));
    assert!(md.contains("- configuration: OK (0 findings)"));
    assert!(!md.contains("Degraded run"));
  }
}
