//! Analyzer Orchestrator: runs every registered pass concurrently over the
//! same read-only inputs and waits for all of them.
//!
//! Each pass runs on the blocking pool under its own timeout. A pass that
//! errors, panics or times out contributes an empty FAILED artifact; the
//! remaining passes are unaffected. Artifacts come back in registration order.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::passes::{AnalysisArtifact, AnalyzerPass, PassContext};

pub struct Orchestrator {
  passes: Vec<Arc<dyn AnalyzerPass>>,
  timeout: Duration,
}

impl Orchestrator {
  pub fn new(timeout: Duration) -> Self {
    Self {
      passes: Vec::new(),
      timeout,
    }
  }

  pub fn with_passes(passes: Vec<Arc<dyn AnalyzerPass>>, timeout: Duration) -> Result<Self, EngineError> {
    let mut orchestrator = Self::new(timeout);
    for pass in passes {
      orchestrator.register(pass)?;
    }
    Ok(orchestrator)
  }

  /// Add a pass. Ids are artifact slots, so a second pass with the same id is rejected.
  pub fn register(&mut self, pass: Arc<dyn AnalyzerPass>) -> Result<(), EngineError> {
    if self.passes.iter().any(|p| p.id() == pass.id()) {
      return Err(EngineError::DuplicatePass(pass.id().to_string()));
    }
    self.passes.push(pass);
    Ok(())
  }

  pub fn pass_ids(&self) -> Vec<&str> {
    self.passes.iter().map(|p| p.id()).collect()
  }

  /// Run all passes and return once each has reached a terminal state.
  pub async fn run(&self, ctx: PassContext) -> Vec<AnalysisArtifact> {
    let handles: Vec<_> = self
      .passes
      .iter()
      .map(|pass| {
        let pass = Arc::clone(pass);
        let ctx = ctx.clone();
        let timeout = self.timeout;
        tokio::spawn(async move { run_one(pass, ctx, timeout).await })
      })
      .collect();

    let mut artifacts = Vec::with_capacity(handles.len());
    for (pass, handle) in self.passes.iter().zip(handles) {
      let artifact = match handle.await {
        Ok(artifact) => artifact,
        Err(e) => {
          let err = EngineError::pass_failure(pass.id(), e.to_string());
          warn!(pass = pass.id(), error = %err, "pass task aborted");
          AnalysisArtifact::failed(pass.id(), &err)
        }
      };
      artifacts.push(artifact);
    }
    artifacts
  }
}

/// Drive `future` on a fresh multi-threaded runtime, then shut the runtime
/// down without joining blocking threads still held by timed-out passes.
pub fn block_on_detached<F: std::future::Future>(future: F) -> Result<F::Output, EngineError> {
  let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
  let output = runtime.block_on(future);
  runtime.shutdown_background();
  Ok(output)
}

async fn run_one(pass: Arc<dyn AnalyzerPass>, ctx: PassContext, timeout: Duration) -> AnalysisArtifact {
  let id = pass.id().to_string();
  let worker = Arc::clone(&pass);
  let task = tokio::task::spawn_blocking(move || worker.run(&ctx));

  let outcome = match tokio::time::timeout(timeout, task).await {
    Ok(Ok(result)) => result,
    Ok(Err(join)) => Err(EngineError::pass_failure(&id, join.to_string())),
    Err(_) => Err(EngineError::PassTimeout {
      pass: id.clone(),
      timeout_ms: timeout.as_millis() as u64,
    }),
  };

  match outcome {
    Ok(mut artifact) => {
      artifact.pass = id;
      info!(
        pass = %artifact.pass,
        status = ?artifact.status,
        findings = artifact.findings.len(),
        "pass complete"
      );
      artifact
    }
    Err(err) => {
      warn!(pass = %id, error = %err, "pass failed, substituting empty artifact");
      AnalysisArtifact::failed(&id, &err)
    }
  }
}
