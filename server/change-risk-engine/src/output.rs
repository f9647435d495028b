//! Artifact persistence under `<root>/<change_set>/`:
//! one `<pass>-analysis.json` per pass, `final-report.json`,
//! `final-report.md` and `metadata.json`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::EngineError;
use crate::passes::AnalysisArtifact;
use crate::report::{render_markdown, FinalReport, RunMetadata};

#[derive(Debug, Serialize)]
struct MetadataDocument<'a> {
  generated_at: DateTime<Utc>,
  risk_score: u32,
  #[serde(flatten)]
  metadata: &'a RunMetadata,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
  root: PathBuf,
}

impl ArtifactWriter {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Output directory for a change set. Path separators and `..` in the id
  /// are replaced so the directory always sits directly under the root.
  pub fn dir_for(&self, change_set: &str) -> Result<PathBuf, EngineError> {
    Ok(self.root.join(path_component("change_set", change_set)?))
  }

  /// Write every artifact and return the paths written, in write order.
  pub fn write(
    &self,
    report: &FinalReport,
    artifacts: &[AnalysisArtifact],
    generated_at: DateTime<Utc>,
  ) -> Result<Vec<PathBuf>, EngineError> {
    let dir = self.dir_for(&report.metadata.change_set)?;
    fs::create_dir_all(&dir)?;

    let mut written = Vec::new();
    for artifact in artifacts {
      let path = dir.join(format!("{}-analysis.json", path_component("pass", &artifact.pass)?));
      write_json(&path, artifact)?;
      written.push(path);
    }

    let path = dir.join("final-report.json");
    write_json(&path, report)?;
    written.push(path);

    let path = dir.join("final-report.md");
    fs::write(&path, render_markdown(report))?;
    written.push(path);

    let path = dir.join("metadata.json");
    write_json(
      &path,
      &MetadataDocument {
        generated_at,
        risk_score: report.risk_score,
        metadata: &report.metadata,
      },
    )?;
    written.push(path);

    info!(dir = %dir.display(), files = written.len(), "artifacts written");
    Ok(written)
  }
}

/// `raw` as a single file-name component: separators and `..` become `_`.
fn path_component(field: &str, raw: &str) -> Result<String, EngineError> {
  let safe: String = raw
    .trim()
    .replace("..", "_")
    .chars()
    .map(|c| if c == '/' || c == '\\' { '_' } else { c })
    .collect();
  if safe.is_empty() {
    return Err(EngineError::validation(field, "must not be empty"));
  }
  Ok(safe)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
  let mut body = serde_json::to_string_pretty(value)?;
  body.push('\n');
  fs::write(path, body)?;
  Ok(())
}
