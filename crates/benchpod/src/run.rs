//! Run entity and its state machine.
//!
//! A [`Run`] is one orchestration attempt. Two lifecycles share the same
//! status enum:
//!
//! ```text
//! benchmark:  pending ──► running ──► succeeded
//!                │           └──────► failed
//!                └──────────────────► canceled
//!
//! deployment: uploaded ──► preparing ──► prepared ──► deploying ──► running
//!                 └────────────┴────────────┴────────────┴─────────────┴──► canceled | failed
//! ```
//!
//! Every mutation goes through a method on [`Run`] that checks the source
//! status, so a terminal run can never be moved again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use benchpod_probe::ProbeResult;

use crate::error::RunError;

/// Run artifact key holding the raw `result.json` content.
pub const ARTIFACT_RESULT_JSON: &str = "result_json";

/// Run artifact key holding the raw telemetry CSV.
pub const ARTIFACT_GPU_CSV: &str = "gpu_csv";

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, execution not started.
    Pending,
    /// Executing on a compute unit, or deployed and serving.
    Running,
    /// Benchmark finished and metrics recorded.
    Succeeded,
    /// Orchestration failed.
    Failed,
    /// Canceled by a caller.
    Canceled,
    /// Model artifact uploaded, awaiting preparation.
    Uploaded,
    /// Compute being prepared.
    Preparing,
    /// Compute prepared, ready to deploy.
    Prepared,
    /// Deployment in progress.
    Deploying,
}

impl RunStatus {
    /// Whether no further transition can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Wire name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Uploaded => "uploaded",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Deploying => "deploying",
        }
    }
}

impl RunStatus {
    /// Position in the deployment lifecycle, if this is a deployment phase.
    const fn deployment_rank(self) -> Option<u8> {
        match self {
            Self::Uploaded => Some(0),
            Self::Preparing => Some(1),
            Self::Prepared => Some(2),
            Self::Deploying => Some(3),
            Self::Running => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "uploaded" => Ok(Self::Uploaded),
            "preparing" => Ok(Self::Preparing),
            "prepared" => Ok(Self::Prepared),
            "deploying" => Ok(Self::Deploying),
            _ => Err(RunError::UnknownPhase(s.to_string())),
        }
    }
}

/// What a benchmark run provisions and executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Compute unit type (e.g., "l4-24gb").
    pub gpu_type: String,
    /// Workload reference handed to the probe.
    pub model_ref: String,
    /// Number of timed samples.
    pub samples: u32,
    /// Optional dataset profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_profile: Option<String>,
}

impl RunSpec {
    /// Create a spec without a dataset profile.
    #[must_use]
    pub fn new(gpu_type: impl Into<String>, model_ref: impl Into<String>, samples: u32) -> Self {
        Self {
            gpu_type: gpu_type.into(),
            model_ref: model_ref.into(),
            samples,
            dataset_profile: None,
        }
    }

    /// Reject specs that cannot be executed.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.samples == 0 {
            return Err(RunError::InvalidSpec("samples must be positive".to_string()));
        }
        if self.gpu_type.trim().is_empty() {
            return Err(RunError::InvalidSpec("gpu_type must not be empty".to_string()));
        }
        if self.model_ref.trim().is_empty() {
            return Err(RunError::InvalidSpec("model_ref must not be empty".to_string()));
        }
        Ok(())
    }

    /// Environment handed to the probe inside the compute unit.
    #[must_use]
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("MODEL_REF".to_string(), self.model_ref.clone());
        env.insert("SAMPLES".to_string(), self.samples.to_string());
        if let Some(profile) = &self.dataset_profile {
            env.insert("DATASET_PROFILE".to_string(), profile.clone());
        }
        env
    }
}

/// Immutable description of what a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTarget {
    /// Benchmark a workload on a fresh compute unit.
    Benchmark(RunSpec),
    /// Deploy an uploaded model artifact.
    Deployment { artifact_key: String },
}

/// Latency and throughput recorded for a succeeded run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Samples the probe reported.
    pub samples: u64,
    /// Median latency in milliseconds.
    pub latency_p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub latency_p95_ms: f64,
    /// Requests per second.
    pub throughput_rps: f64,
}

impl RunMetrics {
    /// Read metrics from raw `result.json` content.
    ///
    /// Missing or malformed content yields zero-valued metrics instead of an
    /// error: the orchestration itself completed, only the numbers are absent.
    #[must_use]
    pub fn from_result_blob(blob: &str) -> Self {
        match serde_json::from_str::<ProbeResult>(blob) {
            Ok(result) => Self::from(&result),
            Err(e) => {
                warn!(error = %e, "Result artifact unreadable; recording zero metrics");
                Self::default()
            }
        }
    }
}

impl From<&ProbeResult> for RunMetrics {
    fn from(result: &ProbeResult) -> Self {
        Self {
            samples: result.samples,
            latency_p50_ms: result.latency_p50_ms,
            latency_p95_ms: result.latency_p95_ms,
            throughput_rps: result.throughput_rps,
        }
    }
}

/// One orchestration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: Uuid,
    /// Current status.
    pub status: RunStatus,
    /// What the run provisions.
    pub target: RunTarget,
    /// Metrics, present once succeeded.
    pub metrics: Option<RunMetrics>,
    /// Retrieved artifacts by name, populated on success.
    pub artifacts: BTreeMap<String, String>,
    /// Failure description, present once failed.
    pub error: Option<String>,
    /// GPU assigned during preparation.
    pub gpu_id: Option<String>,
    /// Endpoint of a deployed model.
    pub service_url: Option<String>,
    /// Deployment progress percentage.
    pub progress: Option<u8>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When benchmark execution began.
    pub started_at: Option<DateTime<Utc>>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// When a terminal status was reached.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    fn with_target(id: Uuid, status: RunStatus, target: RunTarget) -> Self {
        let now = Utc::now();
        Self {
            id,
            status,
            target,
            metrics: None,
            artifacts: BTreeMap::new(),
            error: None,
            gpu_id: None,
            service_url: None,
            progress: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            finished_at: None,
        }
    }

    /// New benchmark run in `pending`.
    #[must_use]
    pub fn benchmark(spec: RunSpec) -> Self {
        Self::with_target(Uuid::new_v4(), RunStatus::Pending, RunTarget::Benchmark(spec))
    }

    /// New deployment run in `uploaded`.
    #[must_use]
    pub fn uploaded(id: Uuid, artifact_key: impl Into<String>) -> Self {
        let mut run = Self::with_target(
            id,
            RunStatus::Uploaded,
            RunTarget::Deployment {
                artifact_key: artifact_key.into(),
            },
        );
        run.progress = Some(0);
        run
    }

    /// Benchmark spec, if this is a benchmark run.
    #[must_use]
    pub fn spec(&self) -> Option<&RunSpec> {
        match &self.target {
            RunTarget::Benchmark(spec) => Some(spec),
            RunTarget::Deployment { .. } => None,
        }
    }

    fn ensure(&self, to: RunStatus, allowed: impl Fn(RunStatus) -> bool) -> Result<(), RunError> {
        if self.status.is_terminal() || !allowed(self.status) {
            return Err(RunError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    fn set_status(&mut self, status: RunStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.finished_at = Some(now);
        }
    }

    /// `pending → running`.
    pub fn mark_running(&mut self) -> Result<(), RunError> {
        self.ensure(RunStatus::Running, |s| s == RunStatus::Pending)?;
        self.set_status(RunStatus::Running);
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// `running → succeeded`, recording metrics and artifacts.
    pub fn mark_succeeded(
        &mut self,
        metrics: RunMetrics,
        artifacts: BTreeMap<String, String>,
    ) -> Result<(), RunError> {
        self.ensure(RunStatus::Succeeded, |s| s == RunStatus::Running)?;
        self.metrics = Some(metrics);
        self.artifacts = artifacts;
        self.set_status(RunStatus::Succeeded);
        Ok(())
    }

    /// Any non-terminal status `→ failed`.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), RunError> {
        self.ensure(RunStatus::Failed, |_| true)?;
        self.error = Some(error.into());
        self.set_status(RunStatus::Failed);
        Ok(())
    }

    /// Any non-terminal status `→ canceled`.
    pub fn cancel(&mut self) -> Result<(), RunError> {
        self.ensure(RunStatus::Canceled, |_| true)?;
        self.set_status(RunStatus::Canceled);
        Ok(())
    }

    /// Advance to `phase`, optionally recording deployment details.
    ///
    /// Used for deployment phases and external completion signals. Any
    /// non-terminal run may be failed or canceled. Deployment runs otherwise
    /// only move forward through `uploaded → preparing → prepared →
    /// deploying → running`, repeating a phase to report progress. Benchmark
    /// runs are driven by their execution task alone, so no other phase is
    /// accepted for them. Metrics and artifacts are only ever set through
    /// [`Run::mark_succeeded`].
    pub fn advance(
        &mut self,
        phase: RunStatus,
        gpu_id: Option<String>,
        service_url: Option<String>,
        progress: Option<u8>,
    ) -> Result<(), RunError> {
        let is_deployment = matches!(self.target, RunTarget::Deployment { .. });
        self.ensure(phase, |from| match phase {
            RunStatus::Failed | RunStatus::Canceled => true,
            _ if !is_deployment => false,
            to => matches!(
                (from.deployment_rank(), to.deployment_rank()),
                (Some(current), Some(next)) if next >= current
            ),
        })?;
        if gpu_id.is_some() {
            self.gpu_id = gpu_id;
        }
        if service_url.is_some() {
            self.service_url = service_url;
        }
        if let Some(progress) = progress {
            self.progress = Some(progress.min(100));
        }
        if phase == RunStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.set_status(phase);
        Ok(())
    }
}
