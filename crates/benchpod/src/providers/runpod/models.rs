//! RunPod pods API models.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Pod creation
// ============================================================================

/// Request body for creating a pod.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodBody {
    /// Pod name.
    pub name: String,
    /// Container image running the probe.
    pub image_name: String,
    /// GPU type identifier.
    pub gpu_type_id: String,
    /// Cloud pool to schedule on.
    pub cloud_type: String,
    /// Environment variables for the container.
    pub env: BTreeMap<String, String>,
    /// Container disk size in GB.
    pub container_disk_in_gb: u32,
}

/// Response to a pod creation request.
#[derive(Debug, Deserialize)]
pub struct CreatePodResponse {
    /// Pod ID.
    pub id: String,
}

// ============================================================================
// Exec
// ============================================================================

/// Request body for running a command in a pod.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecBody {
    /// Pod ID.
    pub pod_id: String,
    /// Command and arguments.
    pub command: Vec<String>,
}

// ============================================================================
// Pod status
// ============================================================================

/// Pod resource as returned by `GET /pods/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusResponse {
    /// Pod ID.
    pub id: String,
    /// Lifecycle phase.
    pub desired_status: PodPhase,
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PodPhase {
    /// Pod accepted, not yet started.
    Created,
    /// Container is running.
    Running,
    /// Container is restarting.
    Restarting,
    /// Container exited; workload finished.
    Exited,
    /// Workload reported completion.
    Completed,
    /// Workload or container failed.
    Failed,
    /// Pod was terminated.
    Terminated,
    /// Unknown phase.
    #[serde(other)]
    Unknown,
}

impl PodPhase {
    /// Workload finished and artifacts can be fetched.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Exited | Self::Completed)
    }

    /// Workload cannot finish.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Exited => write!(f, "exited"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Terminated => write!(f, "terminated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
