//! Compute provider implementations.
//!
//! This module contains the [`Orchestrator`] trait and implementations
//! for cloud providers offering ephemeral GPU pods.

pub mod runpod;
pub mod traits;

pub use traits::{Artifacts, Orchestrator, OrchestratorError, UnitId, PLACEHOLDER_PREFIX};
