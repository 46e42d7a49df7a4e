//! Workflow management module

pub mod orchestrator;

pub use orchestrator::{OrderRunner, PauseMode, RunOutcome, RunSummary};
