//! Quality Gate: reconciles every pass's artifact into one finding set.
//!
//! Steps, in order:
//! 1. structural validation (concrete location, non-generic recommendation)
//! 2. false-positive filter (file must be in the change set)
//! 3. low-impact lexical downgrade (best-effort)
//! 4. deduplication on `(file, line, pattern)`
//! 5. add/remove contradiction resolution per file and resource
//! 6. aggregate score
//! 7. merge decision
//!
//! The gate is single-threaded and runs after every pass is terminal.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::finding::{Confidence, Finding, FindingStatus, Severity};
use crate::passes::AnalysisArtifact;

pub const MAX_RISK_SCORE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeDecision {
  RequestChanges,
  ApproveWithTests,
  Approve,
}

/// What the gate kept, and what it dropped along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
  /// Surviving findings, all with status `Kept`.
  pub findings: Vec<Finding>,
  /// Findings dropped or absorbed, with their final status.
  pub discarded: Vec<Finding>,
  pub rejected_invalid: usize,
  pub filtered_false_positives: usize,
  pub downgraded: usize,
  pub merged_duplicates: usize,
  pub resolved_contradictions: usize,
  pub risk_score: u32,
  pub merge_decision: MergeDecision,
}

// ---------------------------------------------------------------------------
// Recommendation directives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
  CircuitBreaker,
  Timeout,
  Retry,
  DeadLetterQueue,
  IdempotencyKey,
}

impl Primitive {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::CircuitBreaker => "circuit breaker",
      Self::Timeout => "timeout",
      Self::Retry => "retry",
      Self::DeadLetterQueue => "dead letter queue",
      Self::IdempotencyKey => "idempotency key",
    }
  }

  fn from_word(word: &str) -> Option<Self> {
    let w = word.to_ascii_lowercase();
    if w.starts_with("circuit") {
      Some(Self::CircuitBreaker)
    } else if w.starts_with("timeout") {
      Some(Self::Timeout)
    } else if w.starts_with("retr") {
      Some(Self::Retry)
    } else if w.starts_with("dead") || w == "dlq" {
      Some(Self::DeadLetterQueue)
    } else if w.starts_with("idempotency") {
      Some(Self::IdempotencyKey)
    } else {
      None
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
  Add,
  Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive {
  pub verb: Verb,
  pub primitive: Primitive,
}

static DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(
    r"(?i)^\s*(add|restore|enable|introduce|configure|remove|drop|disable|delete)\s+(?:an?\s+|the\s+)?(?:[\w-]+\s+){0,2}?(circuit[\s-]?breakers?|timeouts?|retr(?:y|ies)|dead[\s-]?letter(?:\s+queue)?|dlq|idempotency(?:\s+key)?)\b",
  )
  .expect("directive pattern compiles")
});

/// Leading add/remove instruction on a resilience primitive, if any.
pub fn parse_directive(recommendation: &str) -> Option<Directive> {
  let caps = DIRECTIVE_RE.captures(recommendation)?;
  let verb = match caps[1].to_ascii_lowercase().as_str() {
    "remove" | "drop" | "disable" | "delete" => Verb::Remove,
    _ => Verb::Add,
  };
  let primitive = Primitive::from_word(&caps[2])?;
  Some(Directive { verb, primitive })
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct QualityGate<'a> {
  config: &'a Config,
}

impl<'a> QualityGate<'a> {
  pub fn new(config: &'a Config) -> Self {
    Self { config }
  }

  /// Reconcile `artifacts` against the change set.
  ///
  /// `unmitigated_breaks` counts breaking API/schema changes without a
  /// migration note; any of them forces REQUEST_CHANGES.
  pub fn reconcile(
    &self,
    artifacts: &[AnalysisArtifact],
    changed_files: &BTreeSet<String>,
    unmitigated_breaks: usize,
  ) -> GateOutcome {
    let mut discarded = Vec::new();
    let mut rejected_invalid = 0;
    let mut filtered_false_positives = 0;
    let mut downgraded = 0;

    let mut candidates = Vec::new();
    for finding in artifacts.iter().flat_map(|a| a.findings.iter()) {
      // 1. structural validation
      if let Some(reason) = self.structural_problem(finding) {
        debug!(id = %finding.id, pattern = finding.pattern.as_str(), reason, "finding rejected");
        rejected_invalid += 1;
        discarded.push(with_status(finding.clone(), FindingStatus::Filtered));
        continue;
      }
      // 2. false-positive filter
      if !changed_files.contains(&finding.location.file) {
        debug!(id = %finding.id, file = %finding.location.file, "finding outside change set filtered");
        filtered_false_positives += 1;
        discarded.push(with_status(finding.clone(), FindingStatus::Filtered));
        continue;
      }
      // 3. low-impact downgrade
      let mut finding = finding.clone();
      if self.reads_low_impact(&finding) {
        debug!(id = %finding.id, "impact text reads low-impact, downgrading");
        finding.severity = finding.severity.downgraded();
        finding.confidence = Confidence::Low;
        finding.adjustments.push("low_impact_text(-1)".to_string());
        downgraded += 1;
      }
      candidates.push(finding);
    }

    // 4. dedup
    let (deduped, merged) = deduplicate(candidates);
    let merged_duplicates = merged.len();
    discarded.extend(merged);

    // 5. contradictions
    let (findings, absorbed, resolved_contradictions) = resolve_contradictions(deduped);
    discarded.extend(absorbed);

    // 6-7. score and decision
    let risk_score = risk_score(&findings);
    let merge_decision = merge_decision(&findings, unmitigated_breaks);

    debug!(
      kept = findings.len(),
      rejected_invalid,
      filtered_false_positives,
      merged_duplicates,
      resolved_contradictions,
      risk_score,
      "quality gate complete"
    );

    GateOutcome {
      findings,
      discarded,
      rejected_invalid,
      filtered_false_positives,
      downgraded,
      merged_duplicates,
      resolved_contradictions,
      risk_score,
      merge_decision,
    }
  }

  fn structural_problem(&self, finding: &Finding) -> Option<&'static str> {
    if !finding.location.is_concrete() {
      return Some("no concrete file/line");
    }
    if is_generic(&finding.recommendation, &self.config.generic_recommendations) {
      return Some("generic recommendation");
    }
    None
  }

  fn reads_low_impact(&self, finding: &Finding) -> bool {
    let impact = finding.impact.to_lowercase();
    self
      .config
      .low_impact_phrases
      .iter()
      .any(|p| !p.is_empty() && impact.contains(&p.to_lowercase()))
  }
}

fn with_status(mut finding: Finding, status: FindingStatus) -> Finding {
  finding.status = status;
  finding
}

/// Empty, or equal to a denylisted phrase ignoring case and trailing punctuation.
pub fn is_generic(recommendation: &str, denylist: &[String]) -> bool {
  let norm = |s: &str| {
    s.trim()
      .trim_end_matches(|c: char| c == '.' || c == '!')
      .trim()
      .to_lowercase()
  };
  let rec = norm(recommendation);
  rec.is_empty() || denylist.iter().any(|d| norm(d) == rec)
}

/// Collapse findings sharing `(file, line, pattern)`: max severity, union of
/// tests and sources. First occurrence keeps its position.
pub fn deduplicate(findings: Vec<Finding>) -> (Vec<Finding>, Vec<Finding>) {
  let mut kept: Vec<Finding> = Vec::new();
  let mut index: HashMap<(String, Option<u32>, crate::finding::Pattern), usize> = HashMap::new();
  let mut merged = Vec::new();

  for finding in findings {
    let key = finding.dedup_key();
    match index.get(&key).copied() {
      Some(i) => {
        let existing = &mut kept[i];
        debug!(id = %existing.id, "merging duplicate finding");
        let absorbed = if finding.severity > existing.severity {
          let mut winner = finding;
          winner.test_needed.extend(existing.test_needed.iter().copied());
          winner.sources.extend(existing.sources.iter().cloned());
          std::mem::replace(existing, winner)
        } else {
          existing.test_needed.extend(finding.test_needed.iter().copied());
          existing.sources.extend(finding.sources.iter().cloned());
          finding
        };
        existing.sources.sort();
        existing.sources.dedup();
        merged.push(with_status(absorbed, FindingStatus::Merged));
      }
      None => {
        index.insert(key, kept.len());
        kept.push(finding);
      }
    }
  }
  (kept, merged)
}

/// Replace each add-vs-remove directive set on one resource within one file
/// with a single conservative finding.
///
/// Findings on the same resource in other files never take part. Returns the
/// surviving findings, the absorbed ones, and the number of `(file, resource)`
/// groups that had a contradiction.
pub fn resolve_contradictions(findings: Vec<Finding>) -> (Vec<Finding>, Vec<Finding>, usize) {
  let mut groups: HashMap<(String, String), Vec<(usize, Directive)>> = HashMap::new();
  for (i, f) in findings.iter().enumerate() {
    if let (Some(resource), Some(directive)) = (f.resource.as_deref(), parse_directive(&f.recommendation)) {
      groups
        .entry((f.location.file.clone(), resource.to_string()))
        .or_default()
        .push((i, directive));
    }
  }

  let mut replace: HashMap<usize, Finding> = HashMap::new();
  let mut absorbed_at: BTreeSet<usize> = BTreeSet::new();
  let mut keys: Vec<&(String, String)> = groups.keys().collect();
  keys.sort();

  for key in keys {
    let (file, resource) = key;
    let entries = &groups[key];
    let adds: Vec<&(usize, Directive)> = entries.iter().filter(|(_, d)| d.verb == Verb::Add).collect();
    let removes: Vec<&(usize, Directive)> = entries.iter().filter(|(_, d)| d.verb == Verb::Remove).collect();
    if adds.is_empty() || removes.is_empty() {
      continue;
    }

    let involved: Vec<usize> = entries.iter().map(|(i, _)| *i).collect();
    let lead = involved
      .iter()
      .copied()
      .max_by(|&a, &b| findings[a].severity.cmp(&findings[b].severity).then(b.cmp(&a)))
      .unwrap_or(involved[0]);

    let added = primitive_list(adds.iter().map(|(_, d)| d.primitive));
    let kept = primitive_list(removes.iter().map(|(_, d)| d.primitive));

    let mut resolved = findings[lead].clone();
    resolved.recommendation = format!(
      "Add {added} to {resource} and keep {kept} on {resource} (restore it if it was removed); both recommendations apply until the owners agree otherwise."
    );
    for &i in &involved {
      resolved.test_needed.extend(findings[i].test_needed.iter().copied());
      resolved.sources.extend(findings[i].sources.iter().cloned());
      if findings[i].severity > resolved.severity {
        resolved.severity = findings[i].severity;
      }
    }
    resolved.sources.sort();
    resolved.sources.dedup();
    resolved.adjustments.push("contradiction_resolved".to_string());

    debug!(%file, %resource, involved = involved.len(), "resolved contradictory recommendations");
    replace.insert(lead, resolved);
    absorbed_at.extend(involved.into_iter().filter(|&i| i != lead));
  }

  let resolved_count = replace.len();
  let mut kept = Vec::with_capacity(findings.len());
  let mut absorbed = Vec::new();
  for (i, f) in findings.into_iter().enumerate() {
    if absorbed_at.contains(&i) {
      absorbed.push(with_status(f, FindingStatus::Merged));
    } else if let Some(resolved) = replace.remove(&i) {
      kept.push(resolved);
    } else {
      kept.push(f);
    }
  }
  (kept, absorbed, resolved_count)
}

fn primitive_list(items: impl Iterator<Item = Primitive>) -> String {
  let set: BTreeSet<Primitive> = items.collect();
  let mut names: Vec<String> = set.into_iter().map(|p| format!("a {}", p.as_str())).collect();
  match names.len() {
    0 | 1 => names.pop().unwrap_or_default(),
    n => {
      let last = names.remove(n - 1);
      format!("{} and {}", names.join(", "), last)
    }
  }
}

/// Weighted sum of surviving severities, capped at 100.
pub fn risk_score(findings: &[Finding]) -> u32 {
  findings
    .iter()
    .map(|f| f.severity.points())
    .sum::<u32>()
    .min(MAX_RISK_SCORE)
}

pub fn merge_decision(findings: &[Finding], unmitigated_breaks: usize) -> MergeDecision {
  if unmitigated_breaks > 0 || findings.iter().any(|f| f.severity == Severity::Critical) {
    MergeDecision::RequestChanges
  } else if findings.iter().any(|f| f.severity == Severity::High) {
    MergeDecision::ApproveWithTests
  } else {
    MergeDecision::Approve
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::finding::{FindingType, Location, Pattern, TestKind};
  use crate::passes::PassStatus;

  fn finding(file: &str, line: u32, pattern: Pattern, severity: Severity) -> Finding {
    Finding::new(
      FindingType::Resilience,
      pattern,
      severity,
      Location::new(file, Some(line)),
      Confidence::High,
    )
    .with_text("Slow dependency stalls callers.", "Add a timeout to the vets client.")
  }

  fn artifact(pass: &str, findings: Vec<Finding>) -> AnalysisArtifact {
    AnalysisArtifact {
      pass: pass.to_string(),
      status: PassStatus::Ok,
      findings: findings
        .into_iter()
        .map(|mut f| {
          f.sources = vec![pass.to_string()];
          f
        })
        .collect(),
      error: None,
    }
  }

  fn changed(files: &[&str]) -> BTreeSet<String> {
    files.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn findings_outside_change_set_are_filtered() {
    let config = Config::default();
    let a = artifact(
      "risk",
      vec![
        finding("A.java", 1, Pattern::HttpCallWithoutTimeout, Severity::Medium),
        finding("B.java", 1, Pattern::HttpCallWithoutTimeout, Severity::Medium),
      ],
    );
    let out = QualityGate::new(&config).reconcile(&[a], &changed(&["A.java"]), 0);
    assert_eq!(out.findings.len(), 1);
    assert_eq!(out.findings[0].location.file, "A.java");
    assert_eq!(out.filtered_false_positives, 1);
    assert_eq!(out.discarded[0].status, FindingStatus::Filtered);
  }

  #[test]
  fn missing_line_and_generic_recommendation_are_rejected() {
    let config = Config::default();
    let mut no_line = finding("A.java", 1, Pattern::HttpCallWithoutTimeout, Severity::High);
    no_line.location.line = None;
    let generic = finding("A.java", 2, Pattern::WebhookWithoutRetry, Severity::High)
      .with_text("Deliveries get lost.", "Improve error handling.");
    let ok = finding("A.java", 3, Pattern::HttpCallWithoutTimeout, Severity::Low);
    let out = QualityGate::new(&config).reconcile(&[artifact("risk", vec![no_line, generic, ok])], &changed(&["A.java"]), 0);
    assert_eq!(out.rejected_invalid, 2);
    assert_eq!(out.filtered_false_positives, 0);
    assert_eq!(out.findings.len(), 1);
  }

  #[test]
  fn duplicates_across_passes_keep_max_severity_and_union_tests() {
    let config = Config::default();
    let medium = finding("X.java", 10, Pattern::ConsumerWithoutDlq, Severity::Medium).with_tests(&[TestKind::Unit]);
    let high = finding("X.java", 10, Pattern::ConsumerWithoutDlq, Severity::High).with_tests(&[TestKind::PoisonMessage]);
    let out = QualityGate::new(&config).reconcile(
      &[artifact("risk", vec![medium]), artifact("observability", vec![high])],
      &changed(&["X.java"]),
      0,
    );
    assert_eq!(out.findings.len(), 1);
    let f = &out.findings[0];
    assert_eq!(f.severity, Severity::High);
    assert!(f.test_needed.contains(&TestKind::Unit));
    assert!(f.test_needed.contains(&TestKind::PoisonMessage));
    assert_eq!(f.sources, vec!["observability".to_string(), "risk".to_string()]);
    assert_eq!(out.merged_duplicates, 1);
  }

  #[test]
  fn add_and_remove_on_same_resource_resolve_to_one_finding() {
    let config = Config::default();
    let add = finding("R.java", 5, Pattern::ConsumerExternalCallWithoutCircuitBreaker, Severity::High)
      .with_resource("R")
      .with_text("Outage backs up the queue.", "Add circuit breaker to resource R.");
    let remove = finding("R.java", 9, Pattern::RedundantRetryInConsumer, Severity::Medium)
      .with_resource("R")
      .with_text("Attempts multiply.", "Remove timeout from resource R.");
    let out = QualityGate::new(&config).reconcile(&[artifact("risk", vec![add, remove])], &changed(&["R.java"]), 0);
    assert_eq!(out.resolved_contradictions, 1);
    assert_eq!(out.findings.len(), 1);
    let f = &out.findings[0];
    assert_eq!(f.severity, Severity::High);
    assert!(f.recommendation.contains("Add a circuit breaker to R"));
    assert!(f.recommendation.contains("keep a timeout on R"));
  }

  #[test]
  fn adds_on_different_resources_are_not_contradictions() {
    let (kept, absorbed, n) = resolve_contradictions(vec![
      finding("A.java", 1, Pattern::HttpCallWithoutTimeout, Severity::Medium).with_resource("R1"),
      finding("A.java", 2, Pattern::HttpCallWithoutTimeout, Severity::Medium)
        .with_resource("R2")
        .with_text("x", "Remove retry from R2."),
    ]);
    assert_eq!((kept.len(), absorbed.len(), n), (2, 0, 0));
  }

  #[test]
  fn same_resource_in_another_file_is_left_alone() {
    let config = Config::default();
    let elsewhere = finding("src/a/Sync.java", 10, Pattern::HttpCallWithoutTimeout, Severity::High)
      .with_resource("ledger")
      .with_text("Ledger stalls hold request threads.", "Add a timeout to ledger (LedgerApi.post).");
    let add = finding("src/b/PaymentListener.java", 21, Pattern::RetryWithoutCircuitBreaker, Severity::Critical)
      .with_resource("ledger")
      .with_text("Retries amplify load.", "Add a circuit breaker to ledger alongside the existing retry.");
    let remove = finding("src/b/PaymentListener.java", 21, Pattern::RedundantRetryInConsumer, Severity::Medium)
      .with_resource("ledger")
      .with_text("Attempts multiply.", "Remove retry from ledger: the consumer already redelivers.");
    let out = QualityGate::new(&config).reconcile(
      &[artifact("risk", vec![elsewhere, add, remove])],
      &changed(&["src/a/Sync.java", "src/b/PaymentListener.java"]),
      0,
    );
    assert_eq!(out.resolved_contradictions, 1);
    assert_eq!(out.findings.len(), 2);
    let sync = out
      .findings
      .iter()
      .find(|f| f.location.file == "src/a/Sync.java")
      .unwrap();
    assert_eq!(sync.pattern, Pattern::HttpCallWithoutTimeout);
    assert_eq!(sync.severity, Severity::High);
    assert_eq!(out.risk_score, 40);
  }

  #[test]
  fn primitive_lists_keep_their_articles() {
    assert_eq!(primitive_list([Primitive::Timeout].into_iter()), "a timeout");
    assert_eq!(
      primitive_list([Primitive::Timeout, Primitive::CircuitBreaker].into_iter()),
      "a circuit breaker and a timeout"
    );
    assert_eq!(
      primitive_list([Primitive::Retry, Primitive::Timeout, Primitive::CircuitBreaker].into_iter()),
      "a circuit breaker, a timeout and a retry"
    );
  }

  #[test]
  fn low_impact_text_downgrades_and_lowers_confidence() {
    let config = Config::default();
    let f = finding("A.java", 1, Pattern::HttpCallWithoutTimeout, Severity::High)
      .with_text("Logging only; negligible effect.", "Add a timeout to the audit client.");
    let out = QualityGate::new(&config).reconcile(&[artifact("risk", vec![f])], &changed(&["A.java"]), 0);
    assert_eq!(out.findings[0].severity, Severity::Medium);
    assert_eq!(out.findings[0].confidence, Confidence::Low);
    assert_eq!(out.downgraded, 1);
  }

  #[test]
  fn score_weights_and_cap() {
    let f = |s| finding("A.java", 1, Pattern::HttpCallWithoutTimeout, s);
    assert_eq!(risk_score(&[f(Severity::Medium)]), 8);
    assert_eq!(risk_score(&[f(Severity::Critical), f(Severity::High), f(Severity::Low)]), 42);
    assert_eq!(risk_score(&vec![f(Severity::Critical); 5]), 100);
  }

  #[test]
  fn merge_decision_rules() {
    let f = |s| finding("A.java", 1, Pattern::HttpCallWithoutTimeout, s);
    assert_eq!(merge_decision(&[f(Severity::Low), f(Severity::Critical)], 0), MergeDecision::RequestChanges);
    assert_eq!(merge_decision(&[f(Severity::Critical), f(Severity::Low)], 0), MergeDecision::RequestChanges);
    assert_eq!(merge_decision(&[f(Severity::High)], 0), MergeDecision::ApproveWithTests);
    assert_eq!(merge_decision(&[f(Severity::Medium)], 0), MergeDecision::Approve);
    assert_eq!(merge_decision(&[], 1), MergeDecision::RequestChanges);
  }

  #[test]
  fn directive_parsing() {
    let d = |s| parse_directive(s);
    assert_eq!(
      d("Add a circuit breaker to payments-api alongside the retry."),
      Some(Directive { verb: Verb::Add, primitive: Primitive::CircuitBreaker })
    );
    assert_eq!(
      d("Restore the timeout on client.read-timeout to a finite value."),
      Some(Directive { verb: Verb::Add, primitive: Primitive::Timeout })
    );
    assert_eq!(
      d("Add a confirmation timeout to sends on audit."),
      Some(Directive { verb: Verb::Add, primitive: Primitive::Timeout })
    );
    assert_eq!(
      d("remove retry from StripeApi.charge: the consumer already redelivers."),
      Some(Directive { verb: Verb::Remove, primitive: Primitive::Retry })
    );
    assert_eq!(
      d("Add a dead letter queue for orders."),
      Some(Directive { verb: Verb::Add, primitive: Primitive::DeadLetterQueue })
    );
    assert_eq!(d("Switch orders to manual acknowledgement."), None);
    assert_eq!(d("Load test with pool = 50."), None);
  }

  #[test]
  fn generic_matching_ignores_case_and_punctuation() {
    let deny = Config::default().generic_recommendations;
    assert!(is_generic("  Improve error handling! ", &deny));
    assert!(is_generic("", &deny));
    assert!(!is_generic("Improve error handling around StripeApi.charge by mapping 402s.", &deny));
  }
}
