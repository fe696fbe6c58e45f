//! Run service: admission, execution, and phase control.
//!
//! Every started run gets its own task on a [`TaskTracker`]. The task drives
//! the [`Orchestrator`] through create, exec, wait and stop, then writes the
//! terminal status. Callers never wait on that task; they observe progress
//! through [`RunService::get_run`].

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use benchpod_probe::{RESULT_FILE, TELEMETRY_FILE};

use crate::artifacts::{artifact_key, ArtifactStore};
use crate::config::Config;
use crate::error::RunError;
use crate::providers::{Artifacts, Orchestrator, OrchestratorError, UnitId};
use crate::run::{Run, RunMetrics, RunSpec, RunStatus, ARTIFACT_GPU_CSV, ARTIFACT_RESULT_JSON};
use crate::store::RunStore;

/// Extra time beyond the wait timeout before the service abandons a unit.
const EXECUTION_GRACE: Duration = Duration::from_secs(30);

/// Command run inside the compute unit.
const PROBE_COMMAND: [&str; 2] = ["probe", "run"];

/// Progress reported when preparation starts.
const PREPARE_START_PROGRESS: u8 = 10;

/// Why an execution produced no artifacts.
#[derive(Debug, Error)]
enum ExecutionError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Execution exceeded {0:?}")]
    Deadline(Duration),

    #[error("Execution panicked: {0}")]
    Panicked(String),
}

/// Requested phase change for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseUpdate {
    /// Target status.
    pub phase: RunStatus,
    /// GPU assigned to the run.
    pub gpu_id: Option<String>,
    /// Endpoint of the deployed model.
    pub service_url: Option<String>,
    /// Progress percentage.
    pub progress: Option<u8>,
}

impl PhaseUpdate {
    /// Move to `phase` without touching deployment details.
    #[must_use]
    pub const fn new(phase: RunStatus) -> Self {
        Self {
            phase,
            gpu_id: None,
            service_url: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_gpu_id(mut self, gpu_id: impl Into<String>) -> Self {
        self.gpu_id = Some(gpu_id.into());
        self
    }

    #[must_use]
    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    #[must_use]
    pub const fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Drives runs through their lifecycle.
///
/// Cheap to clone; clones share the store, the orchestrator and the task
/// tracker.
#[derive(Clone)]
pub struct RunService {
    store: RunStore,
    orchestrator: Arc<dyn Orchestrator>,
    artifact_store: Option<Arc<dyn ArtifactStore>>,
    config: Arc<Config>,
    tracker: TaskTracker,
}

impl RunService {
    /// Create a service over `store` using `orchestrator` for compute.
    #[must_use]
    pub fn new(store: RunStore, orchestrator: Arc<dyn Orchestrator>, config: Config) -> Self {
        Self {
            store,
            orchestrator,
            artifact_store: None,
            config: Arc::new(config),
            tracker: TaskTracker::new(),
        }
    }

    /// Mirror successful run artifacts into `artifact_store`.
    #[must_use]
    pub fn with_artifact_store(mut self, artifact_store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_store = Some(artifact_store);
        self
    }

    /// The underlying run store.
    #[must_use]
    pub const fn store(&self) -> &RunStore {
        &self.store
    }

    /// Service configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of execution and phase tasks still in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Admit a benchmark run and start executing it in the background.
    ///
    /// Returns as soon as the run is stored as `pending`. Must be called from
    /// within a Tokio runtime.
    pub fn start_run(&self, spec: RunSpec) -> Result<Uuid, RunError> {
        spec.validate()?;

        let run = Run::benchmark(spec);
        let run_id = run.id;
        info!(
            run_id = %run_id,
            gpu_type = %run.spec().map_or("", |s| s.gpu_type.as_str()),
            "Run admitted"
        );
        self.store.save(run);

        let service = self.clone();
        self.tracker.spawn(async move { service.execute(run_id).await });

        Ok(run_id)
    }

    /// Snapshot of a run.
    pub fn get_run(&self, run_id: &Uuid) -> Result<Run, RunError> {
        self.store.get(run_id).ok_or(RunError::NotFound(*run_id))
    }

    /// All runs, oldest first.
    #[must_use]
    pub fn list_runs(&self) -> Vec<Run> {
        self.store.list()
    }

    /// Cancel a run that has not reached a terminal status.
    ///
    /// Cooperative: an in-flight execution keeps going, but its outcome is
    /// discarded and its unit is still released.
    pub fn cancel(&self, run_id: &Uuid) -> Result<Run, RunError> {
        let run = self
            .store
            .modify(run_id, |run| run.cancel().map(|()| run.clone()))
            .ok_or(RunError::NotFound(*run_id))??;
        info!(run_id = %run_id, "Run canceled");
        Ok(run)
    }

    /// Move a run to another phase.
    pub fn update_phase(&self, run_id: &Uuid, update: PhaseUpdate) -> Result<Run, RunError> {
        let PhaseUpdate {
            phase,
            gpu_id,
            service_url,
            progress,
        } = update;

        let run = self
            .store
            .modify(run_id, |run| {
                run.advance(phase, gpu_id, service_url, progress)
                    .map(|()| run.clone())
            })
            .ok_or(RunError::NotFound(*run_id))??;
        info!(run_id = %run_id, phase = %phase, "Run phase updated");
        Ok(run)
    }

    /// Register an uploaded model artifact as a new run in `uploaded`.
    pub fn create_uploaded(
        &self,
        artifact_key: impl Into<String>,
        run_id: Option<Uuid>,
    ) -> Result<Run, RunError> {
        let artifact_key = artifact_key.into();
        if artifact_key.trim().is_empty() {
            return Err(RunError::InvalidSpec(
                "artifact_key must not be empty".to_string(),
            ));
        }

        let run = Run::uploaded(run_id.unwrap_or_else(Uuid::new_v4), artifact_key);
        if !self.store.insert_new(run.clone()) {
            return Err(RunError::AlreadyExists(run.id));
        }
        info!(run_id = %run.id, "Upload registered");
        Ok(run)
    }

    /// Begin preparing compute for a run; completes in the background.
    pub fn start_prepare(&self, run_id: &Uuid, gpu_id: impl Into<String>) -> Result<Run, RunError> {
        let run = self.update_phase(
            run_id,
            PhaseUpdate::new(RunStatus::Preparing)
                .with_gpu_id(gpu_id)
                .with_progress(PREPARE_START_PROGRESS),
        )?;

        self.spawn_phase_completion(
            *run_id,
            PhaseUpdate::new(RunStatus::Prepared).with_progress(100),
        );
        Ok(run)
    }

    /// Begin deploying a run; completes in the background with a service URL.
    pub fn start_deploy(&self, run_id: &Uuid) -> Result<Run, RunError> {
        let run = self.update_phase(run_id, PhaseUpdate::new(RunStatus::Deploying))?;

        let service_url = self.config.service_url_for(run_id);
        self.spawn_phase_completion(
            *run_id,
            PhaseUpdate::new(RunStatus::Running).with_service_url(service_url),
        );
        Ok(run)
    }

    /// Poll until the run is terminal or `timeout` passes, returning the last snapshot.
    pub async fn wait_for_completion(
        &self,
        run_id: &Uuid,
        timeout: Duration,
    ) -> Result<Run, RunError> {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let run = self.get_run(run_id)?;
            let expired = deadline.is_some_and(|d| tokio::time::Instant::now() >= d);
            if run.status.is_terminal() || expired {
                return Ok(run);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop admitting background work and wait for in-flight tasks.
    pub async fn shutdown(&self) {
        self.tracker.close();
        info!(in_flight = self.tracker.len(), "Draining in-flight runs");
        self.tracker.wait().await;
    }

    fn spawn_phase_completion(&self, run_id: Uuid, update: PhaseUpdate) {
        let service = self.clone();
        let delay = self.config.mock_delay;
        self.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            let phase = update.phase;
            if let Err(e) = service.update_phase(&run_id, update) {
                info!(run_id = %run_id, phase = %phase, error = %e, "Skipping phase completion");
            }
        });
    }

    /// Execution task body for one benchmark run.
    async fn execute(self, run_id: Uuid) {
        let spec = match self
            .store
            .modify(&run_id, |run| run.mark_running().map(|()| run.spec().cloned()))
        {
            Some(Ok(Some(spec))) => spec,
            Some(Ok(None)) => {
                warn!(run_id = %run_id, "Run has no benchmark spec; not executing");
                return;
            }
            Some(Err(e)) => {
                info!(run_id = %run_id, error = %e, "Run left pending before execution; skipping");
                return;
            }
            None => {
                warn!(run_id = %run_id, "Run disappeared before execution");
                return;
            }
        };
        info!(run_id = %run_id, gpu_type = %spec.gpu_type, model_ref = %spec.model_ref, "Run started");

        let env = spec.environment();
        let unit_id = match AssertUnwindSafe(self.orchestrator.create_unit(&spec.gpu_type, &env))
            .catch_unwind()
            .await
        {
            Ok(unit_id) => unit_id,
            Err(panic) => {
                self.finish(run_id, Err(ExecutionError::Panicked(panic_message(&*panic))))
                    .await;
                return;
            }
        };
        info!(run_id = %run_id, unit_id = %unit_id, "Compute unit assigned");

        let outcome = AssertUnwindSafe(self.run_on_unit(&unit_id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExecutionError::Panicked(panic_message(&*panic))));

        if AssertUnwindSafe(self.orchestrator.stop_unit(&unit_id))
            .catch_unwind()
            .await
            .is_err()
        {
            warn!(run_id = %run_id, unit_id = %unit_id, "Stopping compute unit panicked");
        }

        self.finish(run_id, outcome).await;
    }

    async fn run_on_unit(&self, unit_id: &UnitId) -> Result<Artifacts, ExecutionError> {
        let command: Vec<String> = PROBE_COMMAND.iter().map(ToString::to_string).collect();
        let wait_timeout = self.config.request_timeout;
        let deadline = wait_timeout.saturating_add(EXECUTION_GRACE);

        let steps = async {
            self.orchestrator.exec(unit_id, &command).await;
            self.orchestrator.wait_and_fetch(unit_id, wait_timeout).await
        };

        match tokio::time::timeout(deadline, steps).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExecutionError::Deadline(deadline)),
        }
    }

    /// Write the terminal status, unless the run already reached one.
    async fn finish(&self, run_id: Uuid, outcome: Result<Artifacts, ExecutionError>) {
        match outcome {
            Ok(files) => {
                let metrics = RunMetrics::from_result_blob(
                    files.get(RESULT_FILE).map_or("", String::as_str),
                );
                let artifacts = run_artifacts(&files);

                match self.store.modify(&run_id, |run| {
                    run.mark_succeeded(metrics, artifacts).map_err(|_| run.status)
                }) {
                    Some(Ok(())) => {
                        info!(
                            run_id = %run_id,
                            p50_ms = metrics.latency_p50_ms,
                            p95_ms = metrics.latency_p95_ms,
                            throughput_rps = metrics.throughput_rps,
                            "Run succeeded"
                        );
                        self.mirror_artifacts(run_id, &files).await;
                    }
                    Some(Err(status)) => {
                        info!(run_id = %run_id, status = %status, "Run no longer running; dropping result");
                    }
                    None => warn!(run_id = %run_id, "Run disappeared before completion"),
                }
            }
            Err(failure) => {
                let message = failure.to_string();
                match self.store.modify(&run_id, |run| {
                    run.mark_failed(message.clone()).map_err(|_| run.status)
                }) {
                    Some(Ok(())) => error!(run_id = %run_id, error = %message, "Run failed"),
                    Some(Err(status)) => {
                        info!(run_id = %run_id, status = %status, failure = %message, "Run already terminal; dropping failure");
                    }
                    None => warn!(run_id = %run_id, "Run disappeared before completion"),
                }
            }
        }
    }

    async fn mirror_artifacts(&self, run_id: Uuid, files: &Artifacts) {
        let Some(artifact_store) = &self.artifact_store else {
            return;
        };

        for (name, content) in files {
            let key = artifact_key(&run_id, name);
            match artifact_store.put(&key, content.clone().into_bytes()).await {
                Ok(()) => debug!(run_id = %run_id, key = %key, "Artifact mirrored"),
                Err(e) => warn!(run_id = %run_id, key = %key, error = %e, "Failed to mirror artifact"),
            }
        }
    }
}

/// Map fetched files onto the run's artifact names.
fn run_artifacts(files: &Artifacts) -> BTreeMap<String, String> {
    [(RESULT_FILE, ARTIFACT_RESULT_JSON), (TELEMETRY_FILE, ARTIFACT_GPU_CSV)]
        .into_iter()
        .filter_map(|(file, name)| files.get(file).map(|c| (name.to_string(), c.clone())))
        .collect()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
