//! In-pod run driver: telemetry beside the probe, then artifacts to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::ProbeError;
use crate::result::{ProbeResult, RESULT_FILE, TELEMETRY_FILE};
use crate::runner::{run_probe, validate_samples, Workload};
use crate::telemetry::{NvidiaSmi, TelemetrySampler, TelemetrySource};

/// Upper bound on waiting for the telemetry sampler after the workload ends.
const TELEMETRY_JOIN_TIMEOUT_SECS: u64 = 5;

/// Executes one benchmark run inside the pod.
pub struct Agent {
    workspace: PathBuf,
    source: Arc<dyn TelemetrySource>,
    telemetry_interval: Option<Duration>,
    join_timeout: Duration,
}

impl Agent {
    /// Create an agent writing into `workspace`, sampling via `nvidia-smi`.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            source: Arc::new(NvidiaSmi::default()),
            telemetry_interval: None,
            join_timeout: Duration::from_secs(TELEMETRY_JOIN_TIMEOUT_SECS),
        }
    }

    /// Use a different telemetry source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.source = source;
        self
    }

    /// Override the telemetry sampling interval.
    #[must_use]
    pub const fn with_telemetry_interval(mut self, interval: Duration) -> Self {
        self.telemetry_interval = Some(interval);
        self
    }

    /// Path of the result artifact.
    #[must_use]
    pub fn result_path(&self) -> PathBuf {
        self.workspace.join(RESULT_FILE)
    }

    /// Path of the telemetry artifact.
    #[must_use]
    pub fn telemetry_path(&self) -> PathBuf {
        self.workspace.join(TELEMETRY_FILE)
    }

    /// Run the probe with telemetry and write both artifacts.
    ///
    /// The sampler is always stopped and joined, including when the
    /// workload fails.
    pub async fn execute<W: Workload + ?Sized>(
        &self,
        workload: &W,
        model_ref: &str,
        samples: i64,
    ) -> Result<ProbeResult, ProbeError> {
        validate_samples(samples)?;
        info!(model_ref, samples, "Starting agent run");
        std::fs::create_dir_all(&self.workspace)?;

        let mut sampler = TelemetrySampler::new(Arc::clone(&self.source));
        if let Some(interval) = self.telemetry_interval {
            sampler = sampler.with_interval(interval);
        }
        let telemetry = sampler.spawn(self.telemetry_path());

        let outcome = run_probe(workload, model_ref, samples).await;
        telemetry.join(self.join_timeout).await;
        let result = outcome?;

        write_result(&self.result_path(), &result)?;
        info!(path = %self.result_path().display(), "Run complete");
        Ok(result)
    }
}

fn write_result(path: &Path, result: &ProbeResult) -> Result<(), ProbeError> {
    let content = serde_json::to_string_pretty(result)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::SleepWorkload;
    use crate::telemetry::GpuSample;
    use async_trait::async_trait;

    struct NoDevice;

    #[async_trait]
    impl TelemetrySource for NoDevice {
        async fn sample(&self) -> Result<GpuSample, ProbeError> {
            Err(ProbeError::TelemetryUnavailable("no device".to_string()))
        }
    }

    #[tokio::test]
    async fn test_execute_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(dir.path()).with_source(Arc::new(NoDevice));

        let result = agent
            .execute(&SleepWorkload::new(Duration::from_millis(1)), "mock-v0", 4)
            .await
            .unwrap();
        assert_eq!(result.samples, 4);

        let written: ProbeResult =
            serde_json::from_str(&std::fs::read_to_string(agent.result_path()).unwrap()).unwrap();
        assert_eq!(written, result);

        let csv = std::fs::read_to_string(agent.telemetry_path()).unwrap();
        assert!(csv.starts_with("t,gpu_util,mem_util,vram_mb,power_w,temp_c"));
    }

    #[tokio::test]
    async fn test_execute_rejects_zero_samples_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let agent = Agent::new(dir.path().join("ws")).with_source(Arc::new(NoDevice));

        let err = agent
            .execute(&SleepWorkload::default(), "mock-v0", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidSamples(0)));
        assert!(!agent.result_path().exists());
        assert!(!agent.telemetry_path().exists());
    }
}
