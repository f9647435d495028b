//! Dependency Graph Index: fan-in/fan-out blast radius per changed symbol.
//!
//! Fan-in comes from the injected [`UsageSearch`] collaborator; fan-out comes
//! from the symbol's own calls in the Fact Store. The caller locations and
//! fan-out sets are bounded by `Config::fan_cap`, with `capped = true` on
//! truncation; `callers_count` keeps the reported total.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::facts::{normalize_path, FactStore};
use crate::types::Fact;

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// A changed symbol: a method/API name, or the file stem for file-level facts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId {
  pub file: String,
  pub name: String,
}

impl SymbolId {
  pub fn new(file: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      file: file.into(),
      name: name.into(),
    }
  }
}

/// Every symbol a change set touches: one per file, one per enclosing method
/// that contains a call, and one per changed API / message-schema symbol.
pub fn changed_symbols(store: &FactStore) -> BTreeSet<SymbolId> {
  let mut out = BTreeSet::new();
  for fact in store.facts() {
    out.insert(SymbolId::new(&fact.file, fact.file_symbol()));
    for call in &fact.calls {
      if let Some(m) = call.enclosing_method.as_deref().filter(|m| !m.is_empty()) {
        out.insert(SymbolId::new(&fact.file, m));
      }
    }
    for change in fact.public_api_changes.iter().chain(fact.message_schema_changes.iter()) {
      out.insert(SymbolId::new(&fact.file, &change.symbol));
    }
  }
  out
}

// ---------------------------------------------------------------------------
// Usage search collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLocation {
  pub file: String,
  #[serde(default)]
  pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageResult {
  #[serde(default)]
  pub usage_count: usize,
  #[serde(default)]
  pub locations: Vec<UsageLocation>,
}

/// Caller lookup: `find_usage(symbol, language) -> {usage_count, locations[]}`.
pub trait UsageSearch: Send + Sync {
  fn find_usage(&self, symbol: &str, language: &str) -> Result<UsageResult, EngineError>;
}

/// Stand-in when no usage search is configured: every lookup is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsageSearch;

impl UsageSearch for NoUsageSearch {
  fn find_usage(&self, _symbol: &str, _language: &str) -> Result<UsageResult, EngineError> {
    Err(EngineError::UsageSearchUnavailable("no usage search configured".into()))
  }
}

/// Pre-computed usage results keyed by symbol name (e.g. loaded from a JSON file).
/// Unknown symbols have zero callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticUsageIndex {
  entries: HashMap<String, UsageResult>,
}

impl StaticUsageIndex {
  pub fn from_json(raw: &str) -> Result<Self, EngineError> {
    Ok(serde_json::from_str(raw)?)
  }

  pub fn insert(&mut self, symbol: impl Into<String>, result: UsageResult) {
    self.entries.insert(symbol.into(), result);
  }
}

impl UsageSearch for StaticUsageIndex {
  fn find_usage(&self, symbol: &str, _language: &str) -> Result<UsageResult, EngineError> {
    Ok(self.entries.get(symbol).cloned().unwrap_or_default())
  }
}

// ---------------------------------------------------------------------------
// Blast radius
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanIn {
  /// Total callers reported by usage search, never truncated.
  pub callers_count: usize,
  pub sample_paths: Vec<String>,
  pub is_user_facing: bool,
  pub is_critical_path: bool,
  pub capped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOut {
  pub internal: BTreeSet<String>,
  pub external: BTreeSet<String>,
  pub capped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlastRadius {
  pub fan_in: FanIn,
  pub fan_out: FanOut,
  /// Fan-in could not be computed (usage search unavailable).
  #[serde(default)]
  pub degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
  radii: BTreeMap<SymbolId, BlastRadius>,
  degraded: Vec<String>,
}

impl GraphIndex {
  pub fn build(
    store: &FactStore,
    changed: &BTreeSet<SymbolId>,
    search: &dyn UsageSearch,
    config: &Config,
  ) -> Self {
    let mut index = GraphIndex::default();
    let mut cache: HashMap<(String, String), Result<UsageResult, String>> = HashMap::new();

    for symbol in changed {
      let Some(fact) = store.get(&symbol.file) else {
        debug!(file = %symbol.file, symbol = %symbol.name, "symbol outside fact store, skipped");
        continue;
      };

      let key = (symbol.name.clone(), fact.language.clone());
      let usage = cache
        .entry(key)
        .or_insert_with(|| search.find_usage(&symbol.name, &fact.language).map_err(|e| e.to_string()))
        .clone();

      let (fan_in, degraded) = match usage {
        Ok(result) => (compute_fan_in(&result, config), false),
        Err(reason) => {
          warn!(symbol = %symbol.name, %reason, "usage search unavailable, fan-in capped at 0");
          index
            .degraded
            .push(format!("usage search unavailable for {}: {}", symbol.name, reason));
          (
            FanIn {
              capped: true,
              ..FanIn::default()
            },
            true,
          )
        }
      };

      let fan_out = compute_fan_out(fact, &symbol.name, config.fan_cap);
      index.radii.insert(
        symbol.clone(),
        BlastRadius {
          fan_in,
          fan_out,
          degraded,
        },
      );
    }

    index
  }

  pub fn radius(&self, symbol: &SymbolId) -> Option<&BlastRadius> {
    self.radii.get(symbol)
  }

  /// Radius of `method` in `file`, falling back to the file-level symbol.
  pub fn radius_for(&self, file: &str, method: Option<&str>, file_symbol: &str) -> Option<&BlastRadius> {
    method
      .and_then(|m| self.radii.get(&SymbolId::new(file, m)))
      .or_else(|| self.radii.get(&SymbolId::new(file, file_symbol)))
  }

  pub fn len(&self) -> usize {
    self.radii.len()
  }

  pub fn is_empty(&self) -> bool {
    self.radii.is_empty()
  }

  pub fn degraded(&self) -> &[String] {
    &self.degraded
  }
}

fn compute_fan_in(result: &UsageResult, config: &Config) -> FanIn {
  let total = result.usage_count.max(result.locations.len());
  let capped = total > config.fan_cap;

  let mut paths: Vec<String> = Vec::new();
  for loc in result.locations.iter().take(config.fan_cap) {
    let p = normalize_path(&loc.file);
    if !paths.contains(&p) {
      paths.push(p);
    }
  }

  FanIn {
    callers_count: total,
    is_user_facing: paths.iter().any(|p| path_matches_any(p, &config.user_facing_markers)),
    is_critical_path: paths.iter().any(|p| path_matches_any(p, &config.critical_path_markers)),
    sample_paths: paths.into_iter().take(config.sample_path_limit).collect(),
    capped,
  }
}

fn compute_fan_out(fact: &Fact, symbol: &str, cap: usize) -> FanOut {
  let whole_file = symbol == fact.file_symbol();
  let mut out = FanOut::default();

  for call in &fact.calls {
    let owned = whole_file
      || match call.enclosing_method.as_deref() {
        Some(m) => m == symbol || symbol.ends_with(&format!(".{}", m)),
        None => false,
      };
    if !owned {
      continue;
    }
    let set = if call.is_external {
      &mut out.external
    } else {
      &mut out.internal
    };
    let id = call.resource_id();
    if set.contains(&id) {
      continue;
    }
    if set.len() >= cap {
      out.capped = true;
      continue;
    }
    set.insert(id);
  }
  out
}

// ---------------------------------------------------------------------------
// Path classification (pure)
// ---------------------------------------------------------------------------

/// Split a path into lowercase words on separators and camelCase boundaries.
///
/// `src/api/OwnerController.java` -> `["src", "api", "owner", "controller", "java"]`.
/// An acronym ends before its last capital when a lowercase letter follows:
/// `JWTAuthFilter` -> `["jwt", "auth", "filter"]`.
pub fn path_tokens(path: &str) -> Vec<String> {
  let chars: Vec<char> = path.chars().collect();
  let mut tokens = Vec::new();
  let mut current = String::new();

  for (i, &ch) in chars.iter().enumerate() {
    if !ch.is_alphanumeric() {
      if !current.is_empty() {
        tokens.push(std::mem::take(&mut current));
      }
      continue;
    }
    if ch.is_uppercase() && !current.is_empty() {
      let prev = chars[i - 1];
      let next_lower = chars.get(i + 1).map_or(false, |c| c.is_lowercase());
      if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
        tokens.push(std::mem::take(&mut current));
      }
    }
    current.extend(ch.to_lowercase());
  }
  if !current.is_empty() {
    tokens.push(current);
  }
  tokens
}

/// Path contains one of the markers as a whole word.
pub fn path_matches_any(path: &str, markers: &[String]) -> bool {
  if markers.is_empty() {
    return false;
  }
  let tokens = path_tokens(path);
  markers.iter().any(|m| {
    let m = m.to_ascii_lowercase();
    tokens.iter().any(|t| *t == m)
  })
}

pub fn is_user_facing(paths: &[String], config: &Config) -> bool {
  paths.iter().any(|p| path_matches_any(p, &config.user_facing_markers))
}

pub fn is_critical_path(paths: &[String], config: &Config) -> bool {
  paths.iter().any(|p| path_matches_any(p, &config.critical_path_markers))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn store() -> FactStore {
    FactStore::load(&[json!({
      "file": "src/order/OrderService.java",
      "language": "java",
      "calls": [
        {"line": 10, "method": "charge", "receiver_type": "PaymentClient", "is_external": true,
         "resource": "https://pay.example/charge", "enclosing_method": "placeOrder"},
        {"line": 12, "method": "save", "receiver_type": "OrderRepository", "category": "database",
         "resource": "orders", "enclosing_method": "placeOrder"},
        {"line": 30, "method": "publish", "receiver_type": "KafkaTemplate", "is_external": true,
         "resource": "order-events", "enclosing_method": "notify"}
      ],
      "public_api_changes": [{"symbol": "OrderService.placeOrder", "breaking": false, "line": 9}]
    })])
    .unwrap()
  }

  fn usage(paths: &[&str], count: usize) -> UsageResult {
    UsageResult {
      usage_count: count,
      locations: paths
        .iter()
        .map(|p| UsageLocation {
          file: p.to_string(),
          line: Some(1),
        })
        .collect(),
    }
  }

  #[test]
  fn tokens_split_on_case_and_separators() {
    assert_eq!(
      path_tokens("src/api/OwnerController.java"),
      vec!["src", "api", "owner", "controller", "java"]
    );
    assert_eq!(path_tokens("billing_v2/HTTPClient"), vec!["billing", "v2", "http", "client"]);
    assert_eq!(path_tokens("src/x/RESTHandler.java"), vec!["src", "x", "rest", "handler", "java"]);
    assert_eq!(path_tokens("JWTAuthFilter"), vec!["jwt", "auth", "filter"]);
    assert_eq!(path_tokens("SAMLAuthService"), vec!["saml", "auth", "service"]);
    assert_eq!(path_tokens("io/IOUtils"), vec!["io", "io", "utils"]);
    assert_eq!(path_tokens("API"), vec!["api"]);
  }

  #[test]
  fn acronym_prefixed_names_classify() {
    let config = Config::default();
    assert!(is_user_facing(&["src/x/RESTHandler.java".into()], &config));
    assert!(is_critical_path(&["src/x/JWTAuthFilter.java".into()], &config));
    assert!(is_critical_path(&["src/sso/SAMLAuthService.java".into()], &config));
  }

  #[test]
  fn classification_is_whole_word() {
    let config = Config::default();
    assert!(is_user_facing(&["web/OwnerController.java".into()], &config));
    assert!(!is_user_facing(&["src/capital/Ledger.java".into()], &config));
    assert!(is_critical_path(&["src/auth/TokenVerifier.java".into()], &config));
    assert!(is_critical_path(&["svc/BillingJob.kt".into()], &config));
    assert!(!is_critical_path(&["src/author/Name.java".into()], &config));
  }

  #[test]
  fn changed_symbols_cover_file_methods_and_api() {
    let symbols = changed_symbols(&store());
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert!(names.contains(&"OrderService"));
    assert!(names.contains(&"placeOrder"));
    assert!(names.contains(&"notify"));
    assert!(names.contains(&"OrderService.placeOrder"));
  }

  #[test]
  fn fan_out_partitions_internal_and_external() {
    let store = store();
    let mut search = StaticUsageIndex::default();
    search.insert("placeOrder", usage(&["src/web/OrderController.java"], 1));
    let index = GraphIndex::build(&store, &changed_symbols(&store), &search, &Config::default());

    let radius = index
      .radius(&SymbolId::new("src/order/OrderService.java", "placeOrder"))
      .unwrap();
    assert!(radius.fan_out.external.contains("https://pay.example/charge"));
    assert!(radius.fan_out.internal.contains("orders"));
    assert!(!radius.fan_out.external.contains("order-events"));
    assert!(radius.fan_in.is_user_facing);
    assert!(!radius.degraded);

    let whole = index
      .radius(&SymbolId::new("src/order/OrderService.java", "OrderService"))
      .unwrap();
    assert_eq!(whole.fan_out.external.len(), 2);

    let api = index
      .radius(&SymbolId::new("src/order/OrderService.java", "OrderService.placeOrder"))
      .unwrap();
    assert_eq!(api.fan_out.internal.len(), 1);
  }

  #[test]
  fn fan_in_is_capped() {
    let config = Config {
      fan_cap: 3,
      sample_path_limit: 2,
      ..Config::default()
    };
    let result = usage(&["a/A.java", "b/B.java", "c/C.java", "d/D.java", "e/E.java"], 340);
    let fan_in = compute_fan_in(&result, &config);
    assert!(fan_in.capped);
    assert_eq!(fan_in.callers_count, 340);
    assert_eq!(fan_in.sample_paths, vec!["a/A.java", "b/B.java"]);
  }

  #[test]
  fn small_cap_keeps_high_fan_in_visible() {
    let config = Config {
      fan_cap: 50,
      ..Config::default()
    };
    assert!(config.validate().is_ok());
    let paths: Vec<String> = (0..60).map(|i| format!("src/api/C{i}.java")).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let fan_in = compute_fan_in(&usage(&refs, 340), &config);
    assert!(fan_in.capped);
    assert_eq!(fan_in.callers_count, 340);
    assert!(fan_in.callers_count > config.high_fan_in_threshold);
    assert!(fan_in.is_user_facing);
  }

  #[test]
  fn fan_out_is_capped() {
    let store = store();
    let fact = store.get("src/order/OrderService.java").unwrap();
    let out = compute_fan_out(fact, "OrderService", 1);
    assert!(out.capped);
    assert_eq!(out.external.len(), 1);
  }

  #[test]
  fn unavailable_search_degrades_to_capped_zero() {
    let store = store();
    let index = GraphIndex::build(&store, &changed_symbols(&store), &NoUsageSearch, &Config::default());
    let radius = index.radius_for("src/order/OrderService.java", Some("placeOrder"), "OrderService").unwrap();
    assert_eq!(radius.fan_in.callers_count, 0);
    assert!(radius.fan_in.capped);
    assert!(radius.degraded);
    assert!(!index.degraded().is_empty());
  }

  #[test]
  fn radius_for_falls_back_to_file_symbol() {
    let store = store();
    let index = GraphIndex::build(
      &store,
      &changed_symbols(&store),
      &StaticUsageIndex::default(),
      &Config::default(),
    );
    let fallback = index.radius_for("src/order/OrderService.java", Some("unknownMethod"), "OrderService");
    assert_eq!(
      fallback,
      index.radius(&SymbolId::new("src/order/OrderService.java", "OrderService"))
    );
  }

  #[test]
  fn static_index_parses_json() {
    let idx = StaticUsageIndex::from_json(
      r#"{"placeOrder": {"usage_count": 2, "locations": [{"file": "src/api/A.java", "line": 3}]}}"#,
    )
    .unwrap();
    let r = idx.find_usage("placeOrder", "java").unwrap();
    assert_eq!(r.usage_count, 2);
    assert_eq!(idx.find_usage("missing", "java").unwrap(), UsageResult::default());
  }
}
