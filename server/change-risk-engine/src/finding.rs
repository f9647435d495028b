//! Findings: severity/confidence scales, pattern tags and the Finding entity.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Severity / confidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

impl Severity {
  pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

  /// Integer rank: LOW=0 .. CRITICAL=3.
  pub fn rank(self) -> i32 {
    match self {
      Self::Low => 0,
      Self::Medium => 1,
      Self::High => 2,
      Self::Critical => 3,
    }
  }

  /// Inverse of [`Severity::rank`], clamping anything outside 0..=3.
  pub fn from_rank(rank: i32) -> Self {
    match rank.clamp(0, 3) {
      0 => Self::Low,
      1 => Self::Medium,
      2 => Self::High,
      _ => Self::Critical,
    }
  }

  pub fn downgraded(self) -> Self {
    Self::from_rank(self.rank() - 1)
  }

  /// Contribution to the aggregate risk score.
  pub fn points(self) -> u32 {
    match self {
      Self::Low => 2,
      Self::Medium => 8,
      Self::High => 15,
      Self::Critical => 25,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
  Low,
  Medium,
  High,
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Rule template that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
  HttpCallWithoutTimeout,
  FireAndForgetWithoutConfirmation,
  AsyncPublishWithoutTimeout,
  ConsumerWithoutDlq,
  AutoAckWithoutErrorHandling,
  WebhookWithoutRetry,
  BlockingInAsyncHandler,
  MessageSchemaBreakingChange,
  NoIdempotencyWithAtLeastOnce,
  ConsumerExternalCallWithoutCircuitBreaker,
  ConfigPoolSizeLargeDelta,
  RetryWithoutCircuitBreaker,
  BreakingPublicApiChange,
  ExternalCallWithoutErrorHandling,
  RedundantRetryInConsumer,
  ConfigTimeoutDisabled,
  DependencyMajorVersionChange,
}

impl Pattern {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::HttpCallWithoutTimeout => "http_call_without_timeout",
      Self::FireAndForgetWithoutConfirmation => "fire_and_forget_without_confirmation",
      Self::AsyncPublishWithoutTimeout => "async_publish_without_timeout",
      Self::ConsumerWithoutDlq => "consumer_without_dlq",
      Self::AutoAckWithoutErrorHandling => "auto_ack_without_error_handling",
      Self::WebhookWithoutRetry => "webhook_without_retry",
      Self::BlockingInAsyncHandler => "blocking_in_async_handler",
      Self::MessageSchemaBreakingChange => "message_schema_breaking_change",
      Self::NoIdempotencyWithAtLeastOnce => "no_idempotency_with_at_least_once",
      Self::ConsumerExternalCallWithoutCircuitBreaker => {
        "consumer_external_call_without_circuit_breaker"
      }
      Self::ConfigPoolSizeLargeDelta => "config_pool_size_large_delta",
      Self::RetryWithoutCircuitBreaker => "retry_without_circuit_breaker",
      Self::BreakingPublicApiChange => "breaking_public_api_change",
      Self::ExternalCallWithoutErrorHandling => "external_call_without_error_handling",
      Self::RedundantRetryInConsumer => "redundant_retry_in_consumer",
      Self::ConfigTimeoutDisabled => "config_timeout_disabled",
      Self::DependencyMajorVersionChange => "dependency_major_version_change",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
  Resilience,
  Messaging,
  Compatibility,
  Observability,
  Configuration,
}

/// Kind of test a finding asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
  Unit,
  Integration,
  Contract,
  Timeout,
  FaultInjection,
  Load,
  Idempotency,
  PoisonMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
  #[default]
  Kept,
  Filtered,
  Merged,
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
  pub file: String,
  /// `None` when the extractor gave no line; such findings fail validation.
  pub line: Option<u32>,
}

impl Location {
  pub fn new(file: impl Into<String>, line: Option<u32>) -> Self {
    Self {
      file: file.into(),
      line,
    }
  }

  pub fn is_concrete(&self) -> bool {
    !self.file.trim().is_empty() && self.line.map_or(false, |l| l > 0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitMetrics {
  pub commits_last_period: u32,
  pub rollback_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
  pub id: String,
  #[serde(rename = "type")]
  pub finding_type: FindingType,
  pub pattern: Pattern,
  /// Template severity before contextual adjustment.
  pub base_severity: Severity,
  pub severity: Severity,
  pub location: Location,
  /// Enclosing method, used to pick the symbol's blast radius.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub symbol: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource: Option<String>,
  #[serde(default)]
  pub involves_external: bool,
  pub impact: String,
  pub recommendation: String,
  pub confidence: Confidence,
  #[serde(default)]
  pub test_needed: BTreeSet<TestKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub git_metrics: Option<GitMetrics>,
  /// Context adjustments applied on top of the base severity.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub adjustments: Vec<String>,
  #[serde(default)]
  pub status: FindingStatus,
  /// Pass ids that reported this finding.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub sources: Vec<String>,
}

impl Finding {
  pub fn new(
    finding_type: FindingType,
    pattern: Pattern,
    severity: Severity,
    location: Location,
    confidence: Confidence,
  ) -> Self {
    Self {
      id: finding_id(&location, pattern),
      finding_type,
      pattern,
      base_severity: severity,
      severity,
      location,
      symbol: None,
      resource: None,
      involves_external: false,
      impact: String::new(),
      recommendation: String::new(),
      confidence,
      test_needed: BTreeSet::new(),
      git_metrics: None,
      adjustments: Vec::new(),
      status: FindingStatus::Kept,
      sources: Vec::new(),
    }
  }

  pub fn with_symbol(mut self, symbol: Option<String>) -> Self {
    self.symbol = symbol;
    self
  }

  pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
    self.resource = Some(resource.into());
    self
  }

  pub fn with_external(mut self, external: bool) -> Self {
    self.involves_external = external;
    self
  }

  pub fn with_text(mut self, impact: impl Into<String>, recommendation: impl Into<String>) -> Self {
    self.impact = impact.into();
    self.recommendation = recommendation.into();
    self
  }

  pub fn with_tests(mut self, tests: &[TestKind]) -> Self {
    self.test_needed.extend(tests.iter().copied());
    self
  }

  /// Dedup key: same site, same rule.
  pub fn dedup_key(&self) -> (String, Option<u32>, Pattern) {
    (self.location.file.clone(), self.location.line, self.pattern)
  }
}

/// Stable id: blake3 of file | line | pattern.
pub fn finding_id(location: &Location, pattern: Pattern) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(location.file.as_bytes());
  hasher.update(b"|");
  hasher.update(location.line.unwrap_or(0).to_string().as_bytes());
  hasher.update(b"|");
  hasher.update(pattern.as_str().as_bytes());
  let hex = hasher.finalize().to_hex();
  format!("fnd-{}", &hex[..16])
}
