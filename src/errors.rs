use thiserror::Error;

use crate::models::LeadStatus;

/// The resolver's only hard failure: every stage ended on an aggregator page.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Could not resolve {original} past aggregator page {last}")]
    StuckOnAggregator { original: String, last: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lead status cannot move from {from} to {to}")]
    InvalidTransition { from: LeadStatus, to: LeadStatus },

    #[error("Lead not found: {0}")]
    LeadNotFound(String),

    #[error("Lead #{0} already has an application in progress")]
    ApplyInProgress(i64),

    #[error("Research for '{0}' is already running")]
    AlreadyRunning(String),
}

/// Outcomes that end a research run early. Only the orchestrator turns these
/// into a persisted research status.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Research cancelled")]
    Cancelled,

    #[error("Failed to load resume: {0:#}")]
    ResumeLoad(anyhow::Error),

    #[error("Failed to parse resume: {0:#}")]
    ProfileParse(anyhow::Error),

    #[error("Lead store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
