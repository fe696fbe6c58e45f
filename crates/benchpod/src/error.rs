//! Error types for run management.

use thiserror::Error;
use uuid::Uuid;

use crate::run::RunStatus;

/// Errors surfaced by the run service to its callers.
#[derive(Debug, Error)]
pub enum RunError {
    /// No run with this id.
    #[error("Run not found: {0}")]
    NotFound(Uuid),

    /// A run with this id already exists.
    #[error("Run already exists: {0}")]
    AlreadyExists(Uuid),

    /// Identifier is not a valid run id.
    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    /// Start request failed validation.
    #[error("Invalid run spec: {0}")]
    InvalidSpec(String),

    /// Transition not allowed from the run's current status.
    #[error("Cannot move run from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    /// Phase name not recognized.
    #[error("Unknown run phase: {0}")]
    UnknownPhase(String),
}

/// Parse a caller-supplied run identifier.
pub fn parse_run_id(raw: &str) -> Result<Uuid, RunError> {
    Uuid::parse_str(raw.trim()).map_err(|_| RunError::InvalidRunId(raw.to_string()))
}
