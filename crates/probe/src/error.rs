//! Error types for the probe.

use thiserror::Error;

/// Errors that can occur while probing a workload.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Sample count was zero or negative.
    #[error("samples must be positive, got {0}")]
    InvalidSamples(i64),

    /// Percentile requested over an empty sample set.
    #[error("cannot compute a percentile of an empty sample set")]
    EmptySamples,

    /// A workload iteration failed.
    #[error("workload iteration failed: {0}")]
    Workload(String),

    /// Device telemetry could not be read.
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
