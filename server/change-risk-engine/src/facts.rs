//! Fact Store: validates inbound fact documents and holds the normalized,
//! immutable facts for one analysis run.
//!
//! A malformed document is skipped and recorded as a degradation reason. The
//! load only fails when nothing valid is left.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::*;

#[derive(Debug, Clone, Default)]
pub struct FactStore {
  facts: Vec<Fact>,
  by_file: BTreeMap<String, usize>,
  degraded: Vec<String>,
}

impl FactStore {
  /// Validate raw documents and build the store.
  ///
  /// Fails with [`EngineError::NoFacts`] only when zero documents survive.
  pub fn load(documents: &[serde_json::Value]) -> Result<Self, EngineError> {
    let mut store = FactStore::default();

    for (index, raw) in documents.iter().enumerate() {
      match validate_document(index, raw) {
        Ok(fact) => {
          if store.by_file.contains_key(&fact.file) {
            let err = EngineError::schema(index, "file", format!("duplicate document for {}", fact.file));
            warn!(error = %err, "skipping fact document");
            store.degraded.push(err.to_string());
            continue;
          }
          debug!(file = %fact.file, calls = fact.calls.len(), "fact document accepted");
          store.by_file.insert(fact.file.clone(), store.facts.len());
          store.facts.push(fact);
        }
        Err(err) => {
          warn!(error = %err, "skipping fact document");
          store.degraded.push(err.to_string());
        }
      }
    }

    if store.facts.is_empty() {
      return Err(EngineError::NoFacts {
        rejected: store.degraded.len(),
      });
    }
    Ok(store)
  }

  /// Load from text holding either a JSON array of documents or JSON lines.
  pub fn load_str(raw: &str) -> Result<Self, EngineError> {
    Self::load(&parse_documents(raw)?)
  }

  pub fn facts(&self) -> &[Fact] {
    &self.facts
  }

  pub fn get(&self, file: &str) -> Option<&Fact> {
    self.by_file.get(file).map(|&i| &self.facts[i])
  }

  pub fn changed_files(&self) -> BTreeSet<String> {
    self.by_file.keys().cloned().collect()
  }

  /// Reasons documents were rejected; empty when every document was valid.
  pub fn degraded(&self) -> &[String] {
    &self.degraded
  }

  pub fn is_degraded(&self) -> bool {
    !self.degraded.is_empty()
  }

  /// Breaking API or message-schema changes that carry no migration note.
  pub fn unmitigated_breaking_changes(&self) -> Vec<(&str, &ApiChange)> {
    self
      .facts
      .iter()
      .flat_map(|f| {
        f.public_api_changes
          .iter()
          .chain(f.message_schema_changes.iter())
          .filter(|c| c.is_unmitigated_break())
          .map(move |c| (f.file.as_str(), c))
      })
      .collect()
  }
}

/// Split raw input into documents: a JSON array, a single object, or JSON lines.
pub fn parse_documents(raw: &str) -> Result<Vec<serde_json::Value>, EngineError> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Ok(Vec::new());
  }
  if trimmed.starts_with('[') {
    return Ok(serde_json::from_str(trimmed)?);
  }
  if let Ok(single) = serde_json::from_str::<serde_json::Value>(trimmed) {
    return Ok(vec![single]);
  }
  // JSON lines: keep unparseable lines as null so they are rejected with their index.
  Ok(
    trimmed
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(|l| serde_json::from_str(l).unwrap_or(serde_json::Value::Null))
      .collect(),
  )
}

fn validate_document(index: usize, raw: &serde_json::Value) -> Result<Fact, EngineError> {
  if !raw.is_object() {
    return Err(EngineError::schema(index, "document", "expected a JSON object"));
  }
  let doc: FactDocument = serde_json::from_value(raw.clone())
    .map_err(|e| EngineError::schema(index, "document", e.to_string()))?;

  let file = normalize_path(&doc.file);
  if file.is_empty() {
    return Err(EngineError::schema(index, "file", "must not be empty"));
  }

  for (i, call) in doc.calls.iter().enumerate() {
    if call.line == 0 {
      return Err(EngineError::schema(index, &format!("calls[{}].line", i), "must be positive"));
    }
    if call.method.trim().is_empty() {
      return Err(EngineError::schema(index, &format!("calls[{}].method", i), "must not be empty"));
    }
  }
  for (i, change) in doc
    .public_api_changes
    .iter()
    .chain(doc.message_schema_changes.iter())
    .enumerate()
  {
    if change.symbol.trim().is_empty() {
      return Err(EngineError::schema(index, &format!("api_changes[{}].symbol", i), "must not be empty"));
    }
  }
  for (i, change) in doc.config_changes.iter().enumerate() {
    if change.key.trim().is_empty() {
      return Err(EngineError::schema(index, &format!("config_changes[{}].key", i), "must not be empty"));
    }
  }
  for (i, dep) in doc.dependencies.iter().enumerate() {
    if dep.name.trim().is_empty() {
      return Err(EngineError::schema(index, &format!("dependencies[{}].name", i), "must not be empty"));
    }
  }

  let mut dependencies = doc.dependencies;
  dependencies.sort();
  dependencies.dedup();

  let mut public_api_changes = doc.public_api_changes;
  public_api_changes.sort();
  public_api_changes.dedup();

  let mut message_schema_changes = doc.message_schema_changes;
  message_schema_changes.sort();
  message_schema_changes.dedup();

  // Last write per key wins.
  let mut config_by_key: BTreeMap<String, ConfigChange> = BTreeMap::new();
  for change in doc.config_changes {
    config_by_key.insert(change.key.clone(), change);
  }

  let mut annotations: Vec<Annotation> = doc.annotations.into_iter().map(Annotation::from).collect();
  annotations.sort();
  annotations.dedup();

  Ok(Fact {
    file,
    language: doc.language.trim().to_ascii_lowercase(),
    dependencies,
    calls: doc.calls,
    async_events: doc.async_communication,
    message_schema_changes,
    public_api_changes,
    config_changes: config_by_key.into_values().collect(),
    annotations,
  })
}

/// Normalize a file path for stable comparison:
/// - backslash -> forward slash
/// - collapse repeated slashes
/// - strip leading ./
pub fn normalize_path(p: &str) -> String {
  let s = p.trim().replace('\\', "/");
  let mut out = String::with_capacity(s.len());
  let mut prev_slash = false;
  for ch in s.chars() {
    if ch == '/' {
      if !prev_slash {
        out.push('/');
      }
      prev_slash = true;
    } else {
      prev_slash = false;
      out.push(ch);
    }
  }
  out.strip_prefix("./").unwrap_or(&out).to_string()
}
