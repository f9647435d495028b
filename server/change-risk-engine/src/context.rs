//! Severity Contextualizer: escalates or de-escalates a finding using its
//! symbol's blast radius and optional history signals.
//!
//! Adjustment is computed from `base_severity` every time, so applying it
//! twice with the same inputs yields the same finding.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::Config;
use crate::error::EngineError;
use crate::facts::FactStore;
use crate::finding::{Finding, GitMetrics, Severity};
use crate::graph::{BlastRadius, GraphIndex};

// ---------------------------------------------------------------------------
// History signals
// ---------------------------------------------------------------------------

/// Git and traffic history for changed files. Every lookup is optional;
/// `None` means "unknown" and applies no adjustment.
pub trait HistorySignals: Send + Sync {
  /// Commits touching `file` within the last `window_days`.
  fn commit_churn(&self, file: &str, window_days: u32) -> Option<u32>;
  fn rollback_count(&self, file: &str) -> Option<u32>;
  fn requests_per_minute(&self, file: &str) -> Option<f64>;
}

/// No history available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistorySignals for NoHistory {
  fn commit_churn(&self, _file: &str, _window_days: u32) -> Option<u32> {
    None
  }

  fn rollback_count(&self, _file: &str) -> Option<u32> {
    None
  }

  fn requests_per_minute(&self, _file: &str) -> Option<f64> {
    None
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileHistory {
  /// Commits in the configured lookback window, precomputed by the caller.
  #[serde(default)]
  pub commits: Option<u32>,
  #[serde(default)]
  pub rollbacks: Option<u32>,
  #[serde(default)]
  pub requests_per_minute: Option<f64>,
}

/// History loaded from a JSON object keyed by file path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticHistory {
  files: HashMap<String, FileHistory>,
}

impl StaticHistory {
  pub fn from_json(raw: &str) -> Result<Self, EngineError> {
    let parsed: HashMap<String, FileHistory> = serde_json::from_str(raw)?;
    let files = parsed
      .into_iter()
      .map(|(path, h)| (crate::facts::normalize_path(&path), h))
      .collect();
    Ok(Self { files })
  }

  pub fn insert(&mut self, file: impl Into<String>, history: FileHistory) {
    self.files.insert(file.into(), history);
  }
}

impl HistorySignals for StaticHistory {
  fn commit_churn(&self, file: &str, _window_days: u32) -> Option<u32> {
    self.files.get(file).and_then(|h| h.commits)
  }

  fn rollback_count(&self, file: &str) -> Option<u32> {
    self.files.get(file).and_then(|h| h.rollbacks)
  }

  fn requests_per_minute(&self, file: &str) -> Option<f64> {
    self.files.get(file).and_then(|h| h.requests_per_minute)
  }
}

// ---------------------------------------------------------------------------
// Adjustment table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Adjustment {
  UserFacing,
  HighFanIn,
  ExternalDependency,
  CriticalPath,
  LowTraffic,
  RollbackHistory,
  ChurnHotspot,
}

impl Adjustment {
  pub const ALL: [Adjustment; 7] = [
    Self::UserFacing,
    Self::HighFanIn,
    Self::ExternalDependency,
    Self::CriticalPath,
    Self::LowTraffic,
    Self::RollbackHistory,
    Self::ChurnHotspot,
  ];

  pub fn delta(self) -> i32 {
    match self {
      Self::UserFacing => 2,
      Self::HighFanIn => 1,
      Self::ExternalDependency => 1,
      Self::CriticalPath => 2,
      Self::LowTraffic => -1,
      Self::RollbackHistory => 1,
      Self::ChurnHotspot => 1,
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::UserFacing => "user_facing(+2)",
      Self::HighFanIn => "high_fan_in(+1)",
      Self::ExternalDependency => "external_dependency(+1)",
      Self::CriticalPath => "critical_path(+2)",
      Self::LowTraffic => "low_traffic(-1)",
      Self::RollbackHistory => "rollback_history(+1)",
      Self::ChurnHotspot => "churn_hotspot(+1)",
    }
  }
}

/// Sum the deltas onto `base` and clamp to [LOW, CRITICAL].
pub fn fold(base: Severity, adjustments: &[Adjustment]) -> Severity {
  let delta: i32 = adjustments.iter().map(|a| a.delta()).sum();
  Severity::from_rank(base.rank() + delta)
}

/// Context a single finding is judged in.
#[derive(Debug, Clone, Default)]
pub struct ContextInput {
  pub radius: Option<BlastRadius>,
  pub git_metrics: Option<GitMetrics>,
  pub requests_per_minute: Option<f64>,
}

/// Adjustments that apply to `finding` in `input`, in table order.
pub fn applicable(finding: &Finding, input: &ContextInput, config: &Config) -> Vec<Adjustment> {
  Adjustment::ALL
    .into_iter()
    .filter(|a| match a {
      Adjustment::UserFacing => input.radius.as_ref().map_or(false, |r| r.fan_in.is_user_facing),
      Adjustment::HighFanIn => input
        .radius
        .as_ref()
        .map_or(false, |r| r.fan_in.callers_count > config.high_fan_in_threshold),
      Adjustment::ExternalDependency => finding.involves_external,
      Adjustment::CriticalPath => input.radius.as_ref().map_or(false, |r| r.fan_in.is_critical_path),
      Adjustment::LowTraffic => input
        .requests_per_minute
        .map_or(false, |rpm| rpm < config.low_traffic_rpm),
      Adjustment::RollbackHistory => input.git_metrics.map_or(false, |g| g.rollback_count > 0),
      Adjustment::ChurnHotspot => input
        .git_metrics
        .map_or(false, |g| g.commits_last_period >= config.hotspot_commit_threshold),
    })
    .collect()
}

/// Pure adjustment: severity recomputed from the base rank, adjustments
/// recorded, git metrics attached.
pub fn adjust(finding: &Finding, input: &ContextInput, config: &Config) -> Finding {
  let applied = applicable(finding, input, config);
  let mut out = finding.clone();
  out.severity = fold(finding.base_severity, &applied);
  out.adjustments = applied.iter().map(|a| a.label().to_string()).collect();
  out.git_metrics = input.git_metrics;
  out
}

// ---------------------------------------------------------------------------
// Contextualizer
// ---------------------------------------------------------------------------

/// Resolves context for findings from the graph index and history signals.
pub struct Contextualizer<'a> {
  store: &'a FactStore,
  graph: &'a GraphIndex,
  history: &'a dyn HistorySignals,
  config: &'a Config,
}

impl<'a> Contextualizer<'a> {
  pub fn new(
    store: &'a FactStore,
    graph: &'a GraphIndex,
    history: &'a dyn HistorySignals,
    config: &'a Config,
  ) -> Self {
    Self {
      store,
      graph,
      history,
      config,
    }
  }

  pub fn input_for(&self, finding: &Finding) -> ContextInput {
    let file = finding.location.file.as_str();
    let radius = self.store.get(file).and_then(|fact| {
      self
        .graph
        .radius_for(file, finding.symbol.as_deref(), &fact.file_symbol())
        .cloned()
    });

    let churn = self.history.commit_churn(file, self.config.hotspot_window_days);
    let rollbacks = self.history.rollback_count(file);
    let git_metrics = if churn.is_some() || rollbacks.is_some() {
      Some(GitMetrics {
        commits_last_period: churn.unwrap_or(0),
        rollback_count: rollbacks.unwrap_or(0),
      })
    } else {
      None
    };

    ContextInput {
      radius,
      git_metrics,
      requests_per_minute: self.history.requests_per_minute(file),
    }
  }

  pub fn apply(&self, finding: &Finding) -> Finding {
    adjust(finding, &self.input_for(finding), self.config)
  }

  pub fn apply_all(&self, findings: &[Finding]) -> Vec<Finding> {
    findings.iter().map(|f| self.apply(f)).collect()
  }

  /// Whether `finding` was judged against a blast radius built without usage search.
  pub fn used_degraded_radius(&self, finding: &Finding) -> bool {
    self.input_for(finding).radius.map_or(false, |r| r.degraded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::finding::{Confidence, FindingType, Location, Pattern};
  use crate::graph::{FanIn, FanOut};
  use proptest::prelude::*;

  fn finding(base: Severity) -> Finding {
    Finding::new(
      FindingType::Resilience,
      Pattern::HttpCallWithoutTimeout,
      base,
      Location::new("src/web/OwnerController.java", Some(42)),
      Confidence::High,
    )
  }

  fn radius(callers: usize, user_facing: bool, critical: bool) -> BlastRadius {
    BlastRadius {
      fan_in: FanIn {
        callers_count: callers,
        sample_paths: Vec::new(),
        is_user_facing: user_facing,
        is_critical_path: critical,
        capped: false,
      },
      fan_out: FanOut::default(),
      degraded: false,
    }
  }

  #[test]
  fn user_facing_high_fan_in_clamps_to_critical() {
    let input = ContextInput {
      radius: Some(radius(340, true, false)),
      ..ContextInput::default()
    };
    let out = adjust(&finding(Severity::Medium), &input, &Config::default());
    assert_eq!(out.severity, Severity::Critical);
    assert_eq!(out.adjustments, vec!["user_facing(+2)", "high_fan_in(+1)"]);
  }

  #[test]
  fn no_context_keeps_base() {
    let out = adjust(&finding(Severity::Medium), &ContextInput::default(), &Config::default());
    assert_eq!(out.severity, Severity::Medium);
    assert!(out.adjustments.is_empty());
    assert!(out.git_metrics.is_none());
  }

  #[test]
  fn low_traffic_can_reach_low_but_not_below() {
    let input = ContextInput {
      requests_per_minute: Some(0.2),
      ..ContextInput::default()
    };
    let out = adjust(&finding(Severity::Low), &input, &Config::default());
    assert_eq!(out.severity, Severity::Low);
    assert_eq!(out.adjustments, vec!["low_traffic(-1)"]);
  }

  #[test]
  fn history_signals_attach_git_metrics() {
    let input = ContextInput {
      git_metrics: Some(GitMetrics {
        commits_last_period: 14,
        rollback_count: 2,
      }),
      ..ContextInput::default()
    };
    let out = adjust(&finding(Severity::Low), &input, &Config::default());
    assert_eq!(out.severity, Severity::High);
    assert_eq!(out.git_metrics.unwrap().rollback_count, 2);
  }

  #[test]
  fn exactly_at_fan_in_threshold_does_not_escalate() {
    let input = ContextInput {
      radius: Some(radius(100, false, false)),
      ..ContextInput::default()
    };
    assert_eq!(adjust(&finding(Severity::Medium), &input, &Config::default()).severity, Severity::Medium);
  }

  #[test]
  fn static_history_normalizes_paths() {
    let history = StaticHistory::from_json(r#"{"./src\\A.java": {"commits": 12, "rollbacks": 1}}"#).unwrap();
    assert_eq!(history.commit_churn("src/A.java", 30), Some(12));
    assert_eq!(history.rollback_count("src/A.java"), Some(1));
    assert_eq!(history.requests_per_minute("src/A.java"), None);
    assert_eq!(NoHistory.rollback_count("src/A.java"), None);
  }

  fn any_severity() -> impl Strategy<Value = Severity> {
    (0i32..4).prop_map(Severity::from_rank)
  }

  fn any_adjustments() -> impl Strategy<Value = Vec<Adjustment>> {
    prop::collection::vec(prop::sample::select(Adjustment::ALL.to_vec()), 0..12)
  }

  proptest! {
    #[test]
    fn fold_stays_within_scale(base in any_severity(), adj in any_adjustments()) {
      let out = fold(base, &adj);
      prop_assert!(Severity::ALL.contains(&out));
      prop_assert!((0..=3).contains(&out.rank()));
    }

    #[test]
    fn fold_is_order_independent(
      base in any_severity(),
      (adj, shuffled) in any_adjustments().prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
      prop_assert_eq!(fold(base, &adj), fold(base, &shuffled));
    }

    #[test]
    fn adjust_is_idempotent(
      base in any_severity(),
      callers in 0usize..500,
      user_facing in any::<bool>(),
      critical in any::<bool>(),
      rpm in proptest::option::of(0.0f64..10.0),
    ) {
      let input = ContextInput {
        radius: Some(radius(callers, user_facing, critical)),
        git_metrics: None,
        requests_per_minute: rpm,
      };
      let config = Config::default();
      let once = adjust(&finding(base), &input, &config);
      let twice = adjust(&once, &input, &config);
      prop_assert_eq!(once, twice);
    }
  }
}
