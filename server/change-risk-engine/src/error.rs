//! Structured error types for the change-risk engine.
//!
//! Only [`EngineError::NoFacts`] stops a run. Every other variant is recovered
//! where it happens and recorded as a degradation reason.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("schema: document {document}: {field}: {reason}")]
  Schema {
    document: usize,
    field: String,
    reason: String,
  },

  #[error("no valid fact documents ({rejected} rejected)")]
  NoFacts { rejected: usize },

  #[error("pass {pass} timed out after {timeout_ms}ms")]
  PassTimeout { pass: String, timeout_ms: u64 },

  #[error("pass {pass} failed: {reason}")]
  PassFailure { pass: String, reason: String },

  #[error("duplicate analyzer pass id: {0}")]
  DuplicatePass(String),

  #[error("usage search unavailable: {0}")]
  UsageSearchUnavailable(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn schema(document: usize, field: &str, reason: impl Into<String>) -> Self {
    Self::Schema {
      document,
      field: field.to_string(),
      reason: reason.into(),
    }
  }

  pub fn pass_failure(pass: &str, reason: impl Into<String>) -> Self {
    Self::PassFailure {
      pass: pass.to_string(),
      reason: reason.into(),
    }
  }

  /// True for the one error class that aborts a run before any pass starts.
  pub fn is_fatal(&self) -> bool {
    matches!(self, Self::NoFacts { .. })
  }
}
