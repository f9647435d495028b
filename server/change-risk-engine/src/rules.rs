//! Rule-Based Risk Detector.
//!
//! Each [`Template`] pairs a pattern tag and base severity with a predicate
//! over structured fact fields. Predicates are tagged by the subject they
//! inspect (a call, an async event, a consumer handler call, an API change, a
//! config change or a dependency). Detection never keys on library names:
//! remote calls are recognised by `category`, and uncategorised calls by the
//! receiver type's naming suffix (`*Client`, `*Stub`, ...), which lowers the
//! match confidence to MEDIUM.
//!
//! Impact and recommendation texts are fixed templates filled from the
//! matched fact's fields.
//!
//! Every finding leaves the detector with a concrete line. Async events
//! without one fall back to the first call in their handler; anything still
//! unplaced (config keys, dependencies, schema and API changes) is pinned to
//! [`FILE_LEVEL_LINE`] with confidence lowered to at most MEDIUM.

use tracing::debug;

use crate::config::Config;
use crate::facts::FactStore;
use crate::finding::*;
use crate::types::*;

// ---------------------------------------------------------------------------
// Template table
// ---------------------------------------------------------------------------

/// What a template matched, before it becomes a [`Finding`].
#[derive(Debug, Clone)]
pub struct Hit {
  pub line: Option<u32>,
  pub confidence: Confidence,
  /// Replaces the template's base severity (magnitude-scaled rules).
  pub severity: Option<Severity>,
  pub symbol: Option<String>,
  pub resource: String,
  pub external: bool,
  pub impact: String,
  pub recommendation: String,
}

#[derive(Clone, Copy)]
pub enum Predicate {
  Call(fn(&Call, &Fact, &Config) -> Option<Hit>),
  Async(fn(&AsyncEvent, &Fact, &Config) -> Option<Hit>),
  HandlerCall(fn(&AsyncEvent, &Call, &Fact, &Config) -> Option<Hit>),
  MessageSchema(fn(&ApiChange) -> Option<Hit>),
  PublicApi(fn(&ApiChange) -> Option<Hit>),
  ConfigChange(fn(&ConfigChange, &Config) -> Option<Hit>),
  Dependency(fn(&Dependency) -> Option<Hit>),
}

#[derive(Clone, Copy)]
pub struct Template {
  pub pattern: Pattern,
  pub finding_type: FindingType,
  pub base_severity: Severity,
  pub tests: &'static [TestKind],
  pub predicate: Predicate,
}

impl std::fmt::Debug for Template {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Template")
      .field("pattern", &self.pattern)
      .field("base_severity", &self.base_severity)
      .finish()
  }
}

/// The canonical template set, in matching order.
pub fn standard_templates() -> Vec<Template> {
  use FindingType::*;
  use Pattern::*;
  use TestKind::*;

  vec![
    Template {
      pattern: HttpCallWithoutTimeout,
      finding_type: Resilience,
      base_severity: Severity::Medium,
      tests: &[Timeout, Integration],
      predicate: Predicate::Call(http_call_without_timeout),
    },
    Template {
      pattern: RetryWithoutCircuitBreaker,
      finding_type: Resilience,
      base_severity: Severity::Critical,
      tests: &[FaultInjection, Integration],
      predicate: Predicate::Call(retry_without_circuit_breaker),
    },
    Template {
      pattern: ExternalCallWithoutErrorHandling,
      finding_type: Observability,
      base_severity: Severity::Medium,
      tests: &[FaultInjection, Unit],
      predicate: Predicate::Call(external_call_without_error_handling),
    },
    Template {
      pattern: FireAndForgetWithoutConfirmation,
      finding_type: Messaging,
      base_severity: Severity::High,
      tests: &[Integration, FaultInjection],
      predicate: Predicate::Async(fire_and_forget_without_confirmation),
    },
    Template {
      pattern: AsyncPublishWithoutTimeout,
      finding_type: Messaging,
      base_severity: Severity::High,
      tests: &[Timeout, Integration],
      predicate: Predicate::Async(async_publish_without_timeout),
    },
    Template {
      pattern: ConsumerWithoutDlq,
      finding_type: Messaging,
      base_severity: Severity::Critical,
      tests: &[PoisonMessage, Integration],
      predicate: Predicate::Async(consumer_without_dlq),
    },
    Template {
      pattern: AutoAckWithoutErrorHandling,
      finding_type: Messaging,
      base_severity: Severity::Critical,
      tests: &[PoisonMessage, FaultInjection],
      predicate: Predicate::Async(auto_ack_without_error_handling),
    },
    Template {
      pattern: WebhookWithoutRetry,
      finding_type: Resilience,
      base_severity: Severity::Medium,
      tests: &[FaultInjection],
      predicate: Predicate::Async(webhook_without_retry),
    },
    Template {
      pattern: NoIdempotencyWithAtLeastOnce,
      finding_type: Messaging,
      base_severity: Severity::Medium,
      tests: &[Idempotency],
      predicate: Predicate::Async(no_idempotency_with_at_least_once),
    },
    Template {
      pattern: BlockingInAsyncHandler,
      finding_type: Resilience,
      base_severity: Severity::High,
      tests: &[Load],
      predicate: Predicate::HandlerCall(blocking_in_async_handler),
    },
    Template {
      pattern: ConsumerExternalCallWithoutCircuitBreaker,
      finding_type: Resilience,
      base_severity: Severity::High,
      tests: &[FaultInjection, Integration],
      predicate: Predicate::HandlerCall(consumer_external_call_without_circuit_breaker),
    },
    Template {
      pattern: RedundantRetryInConsumer,
      finding_type: Observability,
      base_severity: Severity::Medium,
      tests: &[FaultInjection],
      predicate: Predicate::HandlerCall(redundant_retry_in_consumer),
    },
    Template {
      pattern: MessageSchemaBreakingChange,
      finding_type: Compatibility,
      base_severity: Severity::Critical,
      tests: &[Contract],
      predicate: Predicate::MessageSchema(message_schema_breaking_change),
    },
    Template {
      pattern: BreakingPublicApiChange,
      finding_type: Compatibility,
      base_severity: Severity::High,
      tests: &[Contract],
      predicate: Predicate::PublicApi(breaking_public_api_change),
    },
    Template {
      pattern: ConfigPoolSizeLargeDelta,
      finding_type: Configuration,
      base_severity: Severity::Medium,
      tests: &[Load],
      predicate: Predicate::ConfigChange(config_pool_size_large_delta),
    },
    Template {
      pattern: ConfigTimeoutDisabled,
      finding_type: Configuration,
      base_severity: Severity::High,
      tests: &[Timeout],
      predicate: Predicate::ConfigChange(config_timeout_disabled),
    },
    Template {
      pattern: DependencyMajorVersionChange,
      finding_type: Configuration,
      base_severity: Severity::Medium,
      tests: &[Integration, Contract],
      predicate: Predicate::Dependency(dependency_major_version_change),
    },
  ]
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Detector {
  templates: Vec<Template>,
}

impl Detector {
  pub fn new(templates: Vec<Template>) -> Self {
    Self { templates }
  }

  /// All standard templates.
  pub fn standard() -> Self {
    Self::new(standard_templates())
  }

  /// Standard templates restricted to `patterns`, keeping table order.
  pub fn only(patterns: &[Pattern]) -> Self {
    Self::new(
      standard_templates()
        .into_iter()
        .filter(|t| patterns.contains(&t.pattern))
        .collect(),
    )
  }

  pub fn templates(&self) -> &[Template] {
    &self.templates
  }

  pub fn detect_all(&self, store: &FactStore, config: &Config) -> Vec<Finding> {
    store.facts().iter().flat_map(|f| self.detect(f, config)).collect()
  }

  /// Match every template against every subject in `fact`, in table order per subject.
  pub fn detect(&self, fact: &Fact, config: &Config) -> Vec<Finding> {
    let mut out = Vec::new();

    for call in &fact.calls {
      for t in &self.templates {
        if let Predicate::Call(p) = t.predicate {
          self.emit(&mut out, t, fact, p(call, fact, config));
        }
      }
    }

    for event in &fact.async_events {
      for t in &self.templates {
        if let Predicate::Async(p) = t.predicate {
          self.emit(&mut out, t, fact, p(event, fact, config));
        }
      }
      if event.operation != AsyncOperation::Consume {
        continue;
      }
      for call in fact.handler_calls(event.handler.as_deref()) {
        for t in &self.templates {
          if let Predicate::HandlerCall(p) = t.predicate {
            self.emit(&mut out, t, fact, p(event, call, fact, config));
          }
        }
      }
    }

    for change in &fact.message_schema_changes {
      for t in &self.templates {
        if let Predicate::MessageSchema(p) = t.predicate {
          self.emit(&mut out, t, fact, p(change));
        }
      }
    }

    for change in &fact.public_api_changes {
      for t in &self.templates {
        if let Predicate::PublicApi(p) = t.predicate {
          self.emit(&mut out, t, fact, p(change));
        }
      }
    }

    for change in &fact.config_changes {
      for t in &self.templates {
        if let Predicate::ConfigChange(p) = t.predicate {
          self.emit(&mut out, t, fact, p(change, config));
        }
      }
    }

    for dep in &fact.dependencies {
      for t in &self.templates {
        if let Predicate::Dependency(p) = t.predicate {
          self.emit(&mut out, t, fact, p(dep));
        }
      }
    }

    out
  }

  fn emit(&self, out: &mut Vec<Finding>, t: &Template, fact: &Fact, hit: Option<Hit>) {
    let Some(hit) = hit else { return };
    let (line, confidence) = match hit.line.filter(|&l| l > 0) {
      Some(line) => (line, hit.confidence),
      None => (FILE_LEVEL_LINE, hit.confidence.min(Confidence::Medium)),
    };
    debug!(pattern = t.pattern.as_str(), file = %fact.file, line, "template matched");
    let finding = Finding::new(
      t.finding_type,
      t.pattern,
      hit.severity.unwrap_or(t.base_severity),
      Location::new(&fact.file, Some(line)),
      confidence,
    )
    .with_symbol(hit.symbol)
    .with_resource(hit.resource)
    .with_external(hit.external)
    .with_text(hit.impact, hit.recommendation)
    .with_tests(t.tests);
    out.push(finding);
  }
}

// ---------------------------------------------------------------------------
// Shared heuristics
// ---------------------------------------------------------------------------

/// Line for file-level facts the extractor did not place.
pub const FILE_LEVEL_LINE: u32 = 1;

/// The event's own line, else the first call made from its handler.
fn event_line(event: &AsyncEvent, fact: &Fact) -> Option<u32> {
  event.line.filter(|&l| l > 0).or_else(|| {
    let handler = event.handler.as_deref()?;
    fact.handler_calls(Some(handler)).map(|c| c.line).min()
  })
}

fn call_label(call: &Call) -> String {
  if call.receiver_type.is_empty() {
    call.method.clone()
  } else {
    format!("{}.{}", call.receiver_type, call.method)
  }
}

/// Receiver type is named like a remote client (`*Client`, `*Stub`, ...).
fn is_client_like(call: &Call, config: &Config) -> bool {
  !call.receiver_type.is_empty()
    && config
      .client_suffixes
      .iter()
      .any(|s| !s.is_empty() && call.receiver_type.ends_with(s.as_str()))
}

/// Remote request/response call: exact by category, or inferred from naming.
/// Returns the confidence of the classification.
fn remote_call_confidence(call: &Call, config: &Config) -> Option<Confidence> {
  if call.category.is_remote_rpc() {
    Some(Confidence::High)
  } else if call.category == CallCategory::Other && is_client_like(call, config) {
    Some(Confidence::Medium)
  } else {
    None
  }
}

fn category_label(call: &Call) -> &'static str {
  match call.category {
    CallCategory::Http => "HTTP",
    CallCategory::Grpc => "gRPC",
    CallCategory::Database => "database",
    CallCategory::MqPublish => "message publish",
    CallCategory::MqConsume => "message consume",
    CallCategory::Other => "remote",
  }
}

fn has_circuit_breaker(call: &Call, fact: &Fact) -> bool {
  call.has_circuit_breaker_annotation || fact.has_class_circuit_breaker()
}

fn handler_symbol(event: &AsyncEvent, call: &Call) -> Option<String> {
  call.enclosing_method.clone().or_else(|| event.handler.clone())
}

fn value_label(v: &serde_json::Value) -> String {
  match v {
    serde_json::Value::String(s) => s.clone(),
    serde_json::Value::Null => "unset".to_string(),
    other => other.to_string(),
  }
}

// ---------------------------------------------------------------------------
// Call predicates
// ---------------------------------------------------------------------------

fn http_call_without_timeout(call: &Call, _fact: &Fact, config: &Config) -> Option<Hit> {
  let confidence = remote_call_confidence(call, config)?;
  if !call.is_blocking || call.has_timeout {
    return None;
  }
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence,
    severity: None,
    symbol: call.enclosing_method.clone(),
    external: call.is_external,
    impact: format!(
      "Blocking {} call {} to {} has no timeout; a slow or hung dependency holds the calling thread and can exhaust the request pool.",
      category_label(call),
      call_label(call),
      resource
    ),
    recommendation: format!(
      "Add a timeout to {} ({}): set connect and read timeouts on the client.",
      resource,
      call_label(call)
    ),
    resource,
  })
}

fn retry_without_circuit_breaker(call: &Call, fact: &Fact, config: &Config) -> Option<Hit> {
  if !call.has_retry_annotation || has_circuit_breaker(call, fact) {
    return None;
  }
  let confidence = if call.is_external {
    Confidence::High
  } else if is_client_like(call, config) {
    Confidence::Medium
  } else {
    return None;
  };
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence,
    severity: None,
    symbol: call.enclosing_method.clone(),
    external: true,
    impact: format!(
      "{} retries {} without a circuit breaker; during an outage every request multiplies load on the failing dependency.",
      call_label(call),
      resource
    ),
    recommendation: format!(
      "Add a circuit breaker to {} alongside the existing retry so repeated failures open the circuit instead of amplifying load.",
      resource
    ),
    resource,
  })
}

fn external_call_without_error_handling(call: &Call, _fact: &Fact, _config: &Config) -> Option<Hit> {
  if !call.is_external || call.error_handling.has_try_catch {
    return None;
  }
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence: Confidence::High,
    severity: None,
    symbol: call.enclosing_method.clone(),
    external: true,
    impact: format!(
      "Failures of external call {} to {} propagate unhandled; errors surface as generic 5xx responses with no resource context in logs.",
      call_label(call),
      resource
    ),
    recommendation: format!(
      "Catch the client exception from {} and log it with the resource id {} before mapping it to a domain error.",
      call_label(call),
      resource
    ),
    resource,
  })
}

// ---------------------------------------------------------------------------
// Async event predicates
// ---------------------------------------------------------------------------

fn fire_and_forget_without_confirmation(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if !event.fire_and_forget || event.confirmation.has_timeout {
    return None;
  }
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact),
    confidence: Confidence::High,
    severity: None,
    symbol: event.handler.clone(),
    external: event.kind == AsyncKind::HttpWebhook,
    impact: format!(
      "Messages sent to {} {} are fire-and-forget with no confirmation; broker or network failures drop them silently.",
      kind_label(event.kind),
      resource
    ),
    recommendation: format!(
      "Add a confirmation timeout to sends on {} and handle the send result (callback or future) instead of discarding it.",
      resource
    ),
    resource,
  })
}

fn async_publish_without_timeout(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if event.operation != AsyncOperation::Publish || event.confirmation.has_timeout {
    return None;
  }
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact),
    confidence: Confidence::High,
    severity: None,
    symbol: event.handler.clone(),
    external: event.kind == AsyncKind::HttpWebhook,
    impact: format!(
      "Publishing to {} {} waits for confirmation without a bound; a stalled broker blocks the publisher.",
      kind_label(event.kind),
      resource
    ),
    recommendation: format!(
      "Add a timeout to the publish confirmation on {} and decide what happens when it expires (retry, park, or fail the request).",
      resource
    ),
    resource,
  })
}

fn consumer_without_dlq(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if event.operation != AsyncOperation::Consume || event.error_handling.has_dead_letter {
    return None;
  }
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact),
    confidence: Confidence::High,
    severity: None,
    symbol: event.handler.clone(),
    external: event.kind == AsyncKind::HttpWebhook,
    impact: format!(
      "Consumer of {} {} has no dead letter destination; a poison message is either redelivered forever, blocking the partition, or dropped.",
      kind_label(event.kind),
      resource
    ),
    recommendation: format!(
      "Add a dead letter queue for {} so messages that keep failing are parked for inspection.",
      resource
    ),
    resource,
  })
}

fn auto_ack_without_error_handling(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if event.ack_mode != Some(AckMode::Auto) {
    return None;
  }
  let unguarded = fact
    .handler_calls(event.handler.as_deref())
    .find(|c| !c.error_handling.has_try_catch)?;
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact).or(Some(unguarded.line)),
    confidence: Confidence::High,
    severity: None,
    symbol: event.handler.clone(),
    external: false,
    impact: format!(
      "{} is auto-acknowledged while handler call {} has no error handling; a failure after the ack loses the message.",
      resource,
      call_label(unguarded)
    ),
    recommendation: format!(
      "Switch {} to manual acknowledgement and ack only after {} succeeds, or wrap the handler body so failures are routed before the ack.",
      resource,
      call_label(unguarded)
    ),
    resource,
  })
}

fn webhook_without_retry(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if event.kind != AsyncKind::HttpWebhook || event.retry_policy.enabled {
    return None;
  }
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact),
    confidence: Confidence::High,
    severity: None,
    symbol: event.handler.clone(),
    external: true,
    impact: format!(
      "Webhook {} is delivered once; a transient receiver error loses the notification.",
      resource
    ),
    recommendation: format!(
      "Add a retry with exponential backoff to webhook delivery for {}.",
      resource
    ),
    resource,
  })
}

fn no_idempotency_with_at_least_once(event: &AsyncEvent, fact: &Fact, _config: &Config) -> Option<Hit> {
  if event.delivery_guarantee != Some(DeliveryGuarantee::AtLeastOnce) {
    return None;
  }
  // Explicit "none" is a structural match; a missing idempotency block is inferred.
  let confidence = match &event.idempotency {
    Some(i) if i.is_none() => Confidence::High,
    Some(_) => return None,
    None => Confidence::Medium,
  };
  let resource = event.resource_id();
  Some(Hit {
    line: event_line(event, fact),
    confidence,
    severity: None,
    symbol: event.handler.clone(),
    external: false,
    impact: format!(
      "{} is delivered at least once with no idempotency strategy; redelivered messages are processed twice.",
      resource
    ),
    recommendation: format!(
      "Add an idempotency key check for messages on {} (dedupe table or conditional write keyed by message id).",
      resource
    ),
    resource,
  })
}

// ---------------------------------------------------------------------------
// Consumer handler call predicates
// ---------------------------------------------------------------------------

fn blocking_in_async_handler(event: &AsyncEvent, call: &Call, _fact: &Fact, _config: &Config) -> Option<Hit> {
  if !call.in_async_method || !call.is_blocking {
    return None;
  }
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence: Confidence::High,
    severity: None,
    symbol: handler_symbol(event, call),
    external: call.is_external,
    impact: format!(
      "Blocking call {} runs inside the async consumer handler for {}; it stalls the event loop and consumption lag grows under load.",
      call_label(call),
      event.resource_id()
    ),
    recommendation: format!(
      "Move {} off the async handler for {}: use the non-blocking client or offload to a bounded worker pool.",
      call_label(call),
      event.resource_id()
    ),
    resource,
  })
}

fn consumer_external_call_without_circuit_breaker(
  event: &AsyncEvent,
  call: &Call,
  fact: &Fact,
  _config: &Config,
) -> Option<Hit> {
  if !call.is_external || has_circuit_breaker(call, fact) {
    return None;
  }
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence: Confidence::High,
    severity: None,
    symbol: handler_symbol(event, call),
    external: true,
    impact: format!(
      "Consumer of {} calls external {} without a circuit breaker; when it fails every message is retried against it and the backlog grows.",
      event.resource_id(),
      resource
    ),
    recommendation: format!(
      "Add a circuit breaker to {} called from the {} consumer and pause consumption while it is open.",
      resource,
      event.resource_id()
    ),
    resource,
  })
}

fn redundant_retry_in_consumer(event: &AsyncEvent, call: &Call, _fact: &Fact, _config: &Config) -> Option<Hit> {
  if !event.retry_policy.enabled || !call.has_retry_annotation {
    return None;
  }
  let resource = call.resource_id();
  Some(Hit {
    line: Some(call.line),
    confidence: Confidence::Medium,
    severity: None,
    symbol: handler_symbol(event, call),
    external: call.is_external,
    impact: format!(
      "{} retries inside a consumer that already redelivers failed messages from {}; attempts multiply and failures surface late.",
      call_label(call),
      event.resource_id()
    ),
    recommendation: format!(
      "Remove retry from {}: the {} consumer already redelivers failed messages.",
      resource,
      event.resource_id()
    ),
    resource,
  })
}

// ---------------------------------------------------------------------------
// API change predicates
// ---------------------------------------------------------------------------

fn signature_label(sig: &Option<String>) -> &str {
  sig.as_deref().filter(|s| !s.is_empty()).unwrap_or("?")
}

fn message_schema_breaking_change(change: &ApiChange) -> Option<Hit> {
  if !change.breaking {
    return None;
  }
  Some(Hit {
    line: change.line,
    confidence: Confidence::High,
    severity: None,
    symbol: Some(change.symbol.clone()),
    external: false,
    impact: format!(
      "Message schema {} changed incompatibly ({} -> {}); consumers on the old schema fail to deserialize in-flight messages.",
      change.symbol,
      signature_label(&change.old_signature),
      signature_label(&change.new_signature)
    ),
    recommendation: format!(
      "Version the {} schema: add new fields as optional, keep the old shape readable, and deploy consumers before producers.",
      change.symbol
    ),
    resource: change.symbol.clone(),
  })
}

fn breaking_public_api_change(change: &ApiChange) -> Option<Hit> {
  if !change.breaking {
    return None;
  }
  Some(Hit {
    line: change.line,
    confidence: Confidence::High,
    severity: None,
    symbol: Some(change.symbol.clone()),
    external: false,
    impact: format!(
      "Public API {} changed incompatibly ({} -> {}); existing callers break at compile time or at runtime.",
      change.symbol,
      signature_label(&change.old_signature),
      signature_label(&change.new_signature)
    ),
    recommendation: format!(
      "Keep the old {} signature as a deprecated overload for one release, or attach a migration note for its callers.",
      change.symbol
    ),
    resource: change.symbol.clone(),
  })
}

// ---------------------------------------------------------------------------
// Config and dependency predicates
// ---------------------------------------------------------------------------

fn key_has_marker(key: &str, markers: &[String]) -> bool {
  let key = key.to_ascii_lowercase();
  markers.iter().any(|m| !m.is_empty() && key.contains(&m.to_ascii_lowercase()))
}

/// Order-of-magnitude pool changes escalate to HIGH.
const HIGH_POOL_DELTA_RATIO: f64 = 10.0;

fn config_pool_size_large_delta(change: &ConfigChange, config: &Config) -> Option<Hit> {
  if !key_has_marker(&change.key, &config.pool_key_markers) {
    return None;
  }
  let ratio = change.ratio()?;
  if ratio < config.pool_delta_ratio {
    return None;
  }
  let severity = if ratio >= HIGH_POOL_DELTA_RATIO.max(config.pool_delta_ratio) {
    Severity::High
  } else {
    Severity::Medium
  };
  Some(Hit {
    line: change.line,
    confidence: Confidence::High,
    severity: Some(severity),
    symbol: None,
    external: false,
    impact: format!(
      "{} changed from {} to {} ({:.1}x); downstream limits sized for the old value may be exceeded or starved.",
      change.key,
      value_label(&change.old_value),
      value_label(&change.new_value),
      ratio
    ),
    recommendation: format!(
      "Load test with {} = {} before rollout and confirm downstream capacity (database max connections, broker quotas) matches the {:.1}x change.",
      change.key,
      value_label(&change.new_value),
      ratio
    ),
    resource: change.key.clone(),
  })
}

fn config_timeout_disabled(change: &ConfigChange, _config: &Config) -> Option<Hit> {
  if !change.key.to_ascii_lowercase().contains("timeout") {
    return None;
  }
  let was_bounded = as_number(&change.old_value).map_or(false, |v| v > 0.0);
  let now_unbounded = match &change.new_value {
    serde_json::Value::Null => true,
    serde_json::Value::String(s) => {
      let s = s.trim().to_ascii_lowercase();
      s.is_empty() || s == "none" || s == "infinite" || s.parse::<f64>().map_or(false, |v| v <= 0.0)
    }
    v => as_number(v).map_or(false, |n| n <= 0.0),
  };
  if !was_bounded || !now_unbounded {
    return None;
  }
  Some(Hit {
    line: change.line,
    confidence: Confidence::High,
    severity: None,
    symbol: None,
    external: false,
    impact: format!(
      "{} was {} and is now {}; calls governed by it can wait forever.",
      change.key,
      value_label(&change.old_value),
      value_label(&change.new_value)
    ),
    recommendation: format!(
      "Restore the timeout on {} to a finite value (previously {}).",
      change.key,
      value_label(&change.old_value)
    ),
    resource: change.key.clone(),
  })
}

fn dependency_major_version_change(dep: &Dependency) -> Option<Hit> {
  if !dep.is_major_change() {
    return None;
  }
  let old = dep.old_version.as_deref().unwrap_or("?");
  let new = dep.new_version.as_deref().unwrap_or("?");
  Some(Hit {
    line: dep.line,
    confidence: Confidence::High,
    severity: None,
    symbol: None,
    external: false,
    impact: format!(
      "{} moves across a major version ({} -> {}); transitive APIs and defaults may change behaviour.",
      dep.name, old, new
    ),
    recommendation: format!(
      "Review the {} {} -> {} migration guide and run the integration suite against the new major version.",
      dep.name, old, new
    ),
    resource: dep.name.clone(),
  })
}
