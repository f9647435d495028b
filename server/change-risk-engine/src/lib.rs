//! Change Risk Scoring Engine: deterministic, rule-based.
//!
//! Ingests structured facts extracted from a diff, computes blast radius per
//! changed symbol, runs independent analyzer passes concurrently, reconciles
//! their findings through a quality gate and emits a scored FinalReport with
//! a merge decision.
//!
//! No AI, no DB, no network; fact extraction, usage search and history
//! signals are injected collaborators.

pub mod config;
pub mod context;
pub mod critic;
pub mod engine;
pub mod error;
pub mod facts;
pub mod finding;
pub mod graph;
pub mod orchestrator;
pub mod output;
pub mod passes;
pub mod report;
pub mod rules;
pub mod types;

pub use config::Config;
pub use engine::{Engine, RunOutput};
pub use error::EngineError;
pub use facts::FactStore;
pub use finding::{Confidence, Finding, Severity};
pub use report::{FinalReport, RiskLevel};
