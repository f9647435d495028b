//! Fact schema types: the JSON contract with the fact-extraction service and
//! the normalized, immutable facts the pipeline reasons over.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCategory {
  Http,
  Grpc,
  Database,
  MqPublish,
  MqConsume,
  #[default]
  Other,
}

impl CallCategory {
  /// Remote request/response categories that need a timeout.
  pub fn is_remote_rpc(self) -> bool {
    matches!(self, Self::Http | Self::Grpc)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallErrorHandling {
  #[serde(default)]
  pub has_try_catch: bool,
}

/// One invocation site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
  pub line: u32,
  #[serde(default)]
  pub receiver_type: String,
  pub method: String,
  #[serde(default)]
  pub category: CallCategory,
  #[serde(default)]
  pub is_blocking: bool,
  #[serde(default)]
  pub has_timeout: bool,
  #[serde(default)]
  pub has_circuit_breaker_annotation: bool,
  #[serde(default)]
  pub has_retry_annotation: bool,
  #[serde(default)]
  pub in_async_method: bool,
  #[serde(default)]
  pub is_external: bool,
  #[serde(default)]
  pub timeout_value_ms: Option<u64>,
  /// URL, topic, table or other resource identifier the call targets.
  #[serde(default)]
  pub resource: Option<String>,
  #[serde(default)]
  pub error_handling: CallErrorHandling,
  /// Method the call site lives in, when the extractor knows it.
  #[serde(default)]
  pub enclosing_method: Option<String>,
}

impl Call {
  /// Resource id used for fan-out and contradiction grouping.
  pub fn resource_id(&self) -> String {
    match &self.resource {
      Some(r) if !r.is_empty() => r.clone(),
      _ if self.receiver_type.is_empty() => self.method.clone(),
      _ => format!("{}.{}", self.receiver_type, self.method),
    }
  }
}

// ---------------------------------------------------------------------------
// Async communication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncKind {
  KafkaTopic,
  SqsQueue,
  HttpWebhook,
  Websocket,
  GrpcStream,
  BackgroundJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncOperation {
  Publish,
  Consume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
  Auto,
  Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
  AtLeastOnce,
  AtMostOnce,
  ExactlyOnce,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
  #[serde(default)]
  pub has_timeout: bool,
  #[serde(default)]
  pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncErrorHandling {
  #[serde(default)]
  pub has_dead_letter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idempotency {
  pub strategy: String,
}

impl Idempotency {
  pub fn is_none(&self) -> bool {
    let s = self.strategy.trim();
    s.is_empty() || s.eq_ignore_ascii_case("none")
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
  #[serde(default)]
  pub enabled: bool,
}

/// A publish/consume/webhook/stream interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncEvent {
  #[serde(rename = "type")]
  pub kind: AsyncKind,
  pub operation: AsyncOperation,
  #[serde(default)]
  pub line: Option<u32>,
  /// Topic, queue, webhook URL or job name.
  #[serde(default)]
  pub resource: Option<String>,
  /// Method that handles consumed messages.
  #[serde(default)]
  pub handler: Option<String>,
  #[serde(default)]
  pub fire_and_forget: bool,
  #[serde(default)]
  pub confirmation: Confirmation,
  #[serde(default)]
  pub error_handling: AsyncErrorHandling,
  #[serde(default)]
  pub ack_mode: Option<AckMode>,
  #[serde(default)]
  pub idempotency: Option<Idempotency>,
  #[serde(default)]
  pub delivery_guarantee: Option<DeliveryGuarantee>,
  #[serde(default)]
  pub retry_policy: RetryPolicy,
}

impl AsyncEvent {
  pub fn resource_id(&self) -> String {
    match &self.resource {
      Some(r) if !r.is_empty() => r.clone(),
      _ => self.handler.clone().unwrap_or_else(|| kind_label(self.kind).to_string()),
    }
  }
}

pub fn kind_label(kind: AsyncKind) -> &'static str {
  match kind {
    AsyncKind::KafkaTopic => "kafka topic",
    AsyncKind::SqsQueue => "SQS queue",
    AsyncKind::HttpWebhook => "webhook",
    AsyncKind::Websocket => "websocket",
    AsyncKind::GrpcStream => "gRPC stream",
    AsyncKind::BackgroundJob => "background job",
  }
}

// ---------------------------------------------------------------------------
// API, config, dependency and annotation deltas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiChange {
  pub symbol: String,
  #[serde(default)]
  pub old_signature: Option<String>,
  #[serde(default)]
  pub new_signature: Option<String>,
  #[serde(default)]
  pub breaking: bool,
  #[serde(default)]
  pub line: Option<u32>,
  #[serde(default)]
  pub migration_note: Option<String>,
}

impl ApiChange {
  /// Breaking change with no migration note attached.
  pub fn is_unmitigated_break(&self) -> bool {
    self.breaking
      && self
        .migration_note
        .as_deref()
        .map_or(true, |n| n.trim().is_empty())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigChange {
  pub key: String,
  #[serde(default)]
  pub old_value: serde_json::Value,
  #[serde(default)]
  pub new_value: serde_json::Value,
  #[serde(default)]
  pub delta_ratio: Option<f64>,
  #[serde(default)]
  pub line: Option<u32>,
}

impl ConfigChange {
  /// Magnitude of the numeric change: max(new/old, old/new).
  ///
  /// Uses the extractor-supplied ratio when present; `None` when either value
  /// is non-numeric or zero.
  pub fn ratio(&self) -> Option<f64> {
    if let Some(r) = self.delta_ratio {
      if r > 0.0 && r.is_finite() {
        return Some(if r < 1.0 { 1.0 / r } else { r });
      }
      return None;
    }
    let old = as_number(&self.old_value)?;
    let new = as_number(&self.new_value)?;
    if old <= 0.0 || new <= 0.0 {
      return None;
    }
    Some((new / old).max(old / new))
  }
}

pub(crate) fn as_number(v: &serde_json::Value) -> Option<f64> {
  match v {
    serde_json::Value::Number(n) => n.as_f64(),
    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
  pub name: String,
  #[serde(default)]
  pub old_version: Option<String>,
  #[serde(default)]
  pub new_version: Option<String>,
  /// Manifest line of the dependency entry.
  #[serde(default)]
  pub line: Option<u32>,
}

impl Dependency {
  /// Leading numeric version component, ignoring range operators and a `v` prefix.
  pub fn major(version: &str) -> Option<u64> {
    let trimmed = version.trim().trim_start_matches(|c: char| "^~=<>v ".contains(c));
    let head: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    head.parse().ok()
  }

  /// Old and new versions differ in their major component.
  pub fn is_major_change(&self) -> bool {
    match (self.old_version.as_deref(), self.new_version.as_deref()) {
      (Some(old), Some(new)) => match (Self::major(old), Self::major(new)) {
        (Some(a), Some(b)) => a != b,
        _ => false,
      },
      _ => false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Annotation {
  pub name: String,
  /// Line of the annotated element; `None` for class/file-level annotations.
  pub line: Option<u32>,
}

impl Annotation {
  /// Name without a leading `@`, for comparisons.
  pub fn bare_name(&self) -> &str {
    self.name.trim_start_matches('@')
  }
}

/// Annotations arrive either as bare names or as objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundAnnotation {
  Name(String),
  Full {
    name: String,
    #[serde(default)]
    line: Option<u32>,
  },
}

impl From<InboundAnnotation> for Annotation {
  fn from(raw: InboundAnnotation) -> Self {
    match raw {
      InboundAnnotation::Name(name) => Annotation { name, line: None },
      InboundAnnotation::Full { name, line } => Annotation { name, line },
    }
  }
}

// ---------------------------------------------------------------------------
// Inbound document (JSON contract sent by the extractor)
// ---------------------------------------------------------------------------

/// One fact document per changed file. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct FactDocument {
  pub file: String,
  #[serde(default)]
  pub language: String,
  #[serde(default)]
  pub dependencies: Vec<Dependency>,
  #[serde(default)]
  pub calls: Vec<Call>,
  #[serde(default)]
  pub async_communication: Vec<AsyncEvent>,
  #[serde(default)]
  pub message_schema_changes: Vec<ApiChange>,
  #[serde(default)]
  pub public_api_changes: Vec<ApiChange>,
  #[serde(default)]
  pub config_changes: Vec<ConfigChange>,
  #[serde(default)]
  pub annotations: Vec<InboundAnnotation>,
}

// ---------------------------------------------------------------------------
// Normalized fact
// ---------------------------------------------------------------------------

/// Validated facts for one changed file. Immutable once in the store.
#[derive(Debug, Clone)]
pub struct Fact {
  pub file: String,
  pub language: String,
  pub dependencies: Vec<Dependency>,
  pub calls: Vec<Call>,
  pub async_events: Vec<AsyncEvent>,
  pub message_schema_changes: Vec<ApiChange>,
  pub public_api_changes: Vec<ApiChange>,
  pub config_changes: Vec<ConfigChange>,
  pub annotations: Vec<Annotation>,
}

impl Fact {
  /// Symbol name for the file as a whole: the file stem (class name for Java/Kotlin).
  pub fn file_symbol(&self) -> String {
    let name = self.file.rsplit('/').next().unwrap_or(&self.file);
    name.split('.').next().unwrap_or(name).to_string()
  }

  /// Calls made from `handler`, or every call in the file when the handler is unknown.
  pub fn handler_calls<'a>(&'a self, handler: Option<&'a str>) -> impl Iterator<Item = &'a Call> + 'a {
    self.calls.iter().filter(move |c| match handler {
      Some(h) => c.enclosing_method.as_deref() == Some(h),
      None => true,
    })
  }

  /// File-level circuit breaker annotation covering every call.
  pub fn has_class_circuit_breaker(&self) -> bool {
    self
      .annotations
      .iter()
      .any(|a| a.line.is_none() && a.bare_name() == "CircuitBreaker")
  }

  pub fn consumes(&self) -> bool {
    self
      .async_events
      .iter()
      .any(|e| e.operation == AsyncOperation::Consume)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config_change(old: serde_json::Value, new: serde_json::Value) -> ConfigChange {
    ConfigChange {
      key: "db.pool.size".into(),
      old_value: old,
      new_value: new,
      delta_ratio: None,
      line: Some(3),
    }
  }

  #[test]
  fn ratio_from_numbers_and_strings() {
    let c = config_change(serde_json::json!(10), serde_json::json!("50"));
    assert_eq!(c.ratio(), Some(5.0));
  }

  #[test]
  fn ratio_is_symmetric_for_reductions() {
    let c = config_change(serde_json::json!(60), serde_json::json!(20));
    assert_eq!(c.ratio(), Some(3.0));
  }

  #[test]
  fn ratio_absent_for_non_numeric_or_zero() {
    assert_eq!(config_change(serde_json::json!("a"), serde_json::json!(5)).ratio(), None);
    assert_eq!(config_change(serde_json::json!(0), serde_json::json!(5)).ratio(), None);
  }

  #[test]
  fn supplied_ratio_wins() {
    let mut c = config_change(serde_json::json!(1), serde_json::json!(2));
    c.delta_ratio = Some(0.25);
    assert_eq!(c.ratio(), Some(4.0));
  }

  #[test]
  fn major_version_change_ignores_range_operators() {
    let dep = |old: &str, new: &str| Dependency {
      name: "spring-boot".into(),
      old_version: Some(old.into()),
      new_version: Some(new.into()),
      line: Some(5),
    };
    assert!(dep("2.7.18", "3.2.0").is_major_change());
    assert!(dep("^1.4.0", "v2.0.0").is_major_change());
    assert!(!dep("~3.1.0", "3.2.4").is_major_change());
    assert!(!dep("latest", "3.2.4").is_major_change());
  }

  #[test]
  fn annotations_accept_names_and_objects() {
    let raw: Vec<InboundAnnotation> =
      serde_json::from_str(r#"["@CircuitBreaker", {"name": "Retry", "line": 12}]"#).unwrap();
    let anns: Vec<Annotation> = raw.into_iter().map(Annotation::from).collect();
    assert_eq!(anns[0].bare_name(), "CircuitBreaker");
    assert_eq!(anns[0].line, None);
    assert_eq!(anns[1].line, Some(12));
  }

  #[test]
  fn call_resource_falls_back_to_receiver_and_method() {
    let call: Call = serde_json::from_str(
      r#"{"line": 4, "receiver_type": "PaymentClient", "method": "charge"}"#,
    )
    .unwrap();
    assert_eq!(call.category, CallCategory::Other);
    assert_eq!(call.resource_id(), "PaymentClient.charge");
  }

  #[test]
  fn unmitigated_break_requires_empty_note() {
    let mut change = ApiChange {
      symbol: "OrderEvent".into(),
      old_signature: None,
      new_signature: None,
      breaking: true,
      line: Some(1),
      migration_note: Some("  ".into()),
    };
    assert!(change.is_unmitigated_break());
    change.migration_note = Some("dual-write v1/v2 for one release".into());
    assert!(!change.is_unmitigated_break());
  }
}
