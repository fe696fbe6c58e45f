//! Orchestrator facade trait and common types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix of identifiers synthesized when the provider cannot be reached.
pub const PLACEHOLDER_PREFIX: &str = "mock-pod-";

/// Artifacts fetched from a compute unit, by file name.
pub type Artifacts = BTreeMap<String, String>;

/// Errors that can occur during orchestrator operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// The compute unit reported a failure.
    #[error("Compute unit {unit_id} failed with status {status}")]
    UnitFailed { unit_id: String, status: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifier of a provisioned compute unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Wrap a provider-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthesize a locally unique placeholder for degraded mode.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(format!("{PLACEHOLDER_PREFIX}{}", Uuid::new_v4()))
    }

    /// Whether this id was synthesized rather than issued by a provider.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.0
            .strip_prefix(PLACEHOLDER_PREFIX)
            .is_some_and(|rest| Uuid::parse_str(rest).is_ok())
    }

    /// Raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Facade over a remote compute provider.
///
/// The four steps are separate calls so the caller can record progress
/// between them and always reach [`Orchestrator::stop_unit`], whichever
/// step went wrong.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Provision a compute unit configured with `env`.
    ///
    /// Never fails: an unreachable or unconfigured provider yields a
    /// placeholder id and the remaining steps run in degraded mode.
    async fn create_unit(&self, unit_type: &str, env: &BTreeMap<String, String>) -> UnitId;

    /// Ask the unit to run `command`.
    ///
    /// Fire-and-forget: completion is judged by [`Orchestrator::wait_and_fetch`].
    async fn exec(&self, unit_id: &UnitId, command: &[String]);

    /// Wait up to `timeout` for the workload to finish, then fetch artifacts.
    ///
    /// May return partial artifacts after a timeout. Errors only when no
    /// result can be produced at all.
    async fn wait_and_fetch(
        &self,
        unit_id: &UnitId,
        timeout: Duration,
    ) -> Result<Artifacts, OrchestratorError>;

    /// Release the unit. Best-effort; errors are logged, never returned.
    async fn stop_unit(&self, unit_id: &UnitId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_recognizable() {
        let id = UnitId::placeholder();
        assert!(id.as_str().starts_with(PLACEHOLDER_PREFIX));
        assert!(id.is_placeholder());
        assert_ne!(id, UnitId::placeholder());
    }

    #[test]
    fn test_provider_id_is_not_placeholder() {
        assert!(!UnitId::new("pod-abc123").is_placeholder());
        assert!(!UnitId::new("mock-pod-not-a-uuid").is_placeholder());
    }
}
