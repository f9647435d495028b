//! Engine configuration with sane defaults.
//!
//! Every field has a default, so a JSON config file only needs the keys it
//! wants to override.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tunable run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Max fan-in callers / fan-out resources kept per symbol before `capped` is set.
  pub fan_cap: usize,
  /// Max caller paths kept as samples in a blast radius.
  pub sample_path_limit: usize,
  /// Callers above this count escalate severity by one rank.
  pub high_fan_in_threshold: usize,
  /// Requests per minute below which a file counts as low traffic.
  pub low_traffic_rpm: f64,
  /// Commits within the lookback window that make a file a churn hotspot.
  pub hotspot_commit_threshold: u32,
  /// Lookback window for commit churn, in days.
  pub hotspot_window_days: u32,
  /// Per-pass timeout in milliseconds; a pass exceeding it is FAILED.
  pub pass_timeout_ms: u64,
  /// Minimum old/new ratio on a pool/limit key to raise a config finding.
  pub pool_delta_ratio: f64,
  /// Key path fragments that mark a config key as a pool or limit.
  pub pool_key_markers: Vec<String>,
  /// Caller path segments that mark a symbol as user facing.
  pub user_facing_markers: Vec<String>,
  /// Caller path segments that mark a symbol as critical path.
  pub critical_path_markers: Vec<String>,
  /// Recommendations equal to one of these (case-insensitive) are rejected as generic.
  pub generic_recommendations: Vec<String>,
  /// Impact text containing one of these is downgraded one rank.
  pub low_impact_phrases: Vec<String>,
  /// Receiver type suffixes treated as remote clients when the call has no category.
  pub client_suffixes: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      fan_cap: 200,
      sample_path_limit: 10,
      high_fan_in_threshold: 100,
      low_traffic_rpm: 1.0,
      hotspot_commit_threshold: 10,
      hotspot_window_days: 30,
      pass_timeout_ms: 30_000,
      pool_delta_ratio: 3.0,
      pool_key_markers: strings(&[
        "pool",
        "limit",
        "max-connections",
        "max_connections",
        "maxconnections",
        "concurrency",
        "threads",
        "capacity",
      ]),
      user_facing_markers: strings(&[
        "controller",
        "controllers",
        "api",
        "handler",
        "handlers",
        "resource",
        "resources",
        "endpoint",
        "endpoints",
        "rest",
        "web",
        "route",
        "routes",
      ]),
      critical_path_markers: strings(&["auth", "payment", "payments", "billing", "identity"]),
      generic_recommendations: strings(&[
        "improve error handling",
        "add error handling",
        "add logging",
        "add more tests",
        "add tests",
        "review this code",
        "consider refactoring",
        "fix this",
        "handle errors properly",
      ]),
      low_impact_phrases: strings(&[
        "cosmetic",
        "negligible",
        "no user impact",
        "no user-facing impact",
        "logging only",
        "test code only",
        "internal tooling",
        "rarely executed",
        "minor inconvenience",
      ]),
      client_suffixes: strings(&["Client", "Stub", "Template", "Gateway", "Connector"]),
    }
  }
}

fn strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

impl Config {
  /// Parse a (possibly partial) JSON config and validate it.
  pub fn from_json(raw: &str) -> Result<Self, EngineError> {
    let config: Config = serde_json::from_str(raw)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Self, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    Self::from_json(&raw)
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.fan_cap == 0 {
      return Err(EngineError::validation("fan_cap", "must be at least 1"));
    }
    if self.sample_path_limit == 0 {
      return Err(EngineError::validation("sample_path_limit", "must be at least 1"));
    }
    if self.pass_timeout_ms == 0 {
      return Err(EngineError::validation("pass_timeout_ms", "must be positive"));
    }
    if !(self.pool_delta_ratio > 1.0) {
      return Err(EngineError::validation("pool_delta_ratio", "must be greater than 1.0"));
    }
    if self.low_traffic_rpm < 0.0 {
      return Err(EngineError::validation("low_traffic_rpm", "must not be negative"));
    }
    if self.hotspot_window_days == 0 {
      return Err(EngineError::validation("hotspot_window_days", "must be at least 1"));
    }
    Ok(())
  }
}
