//! End-to-end tests for benchmark runs without provider credentials.
//!
//! The RunPod provider falls back to placeholder pods and canned results, so
//! these exercise the full service → orchestrator → store path locally.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use benchpod::providers::runpod::API_BASE_URL;
use benchpod::providers::PLACEHOLDER_PREFIX;
use benchpod::run::{ARTIFACT_GPU_CSV, ARTIFACT_RESULT_JSON};
use benchpod::{
    Artifacts, Config, Orchestrator, OrchestratorError, RunPod, RunService, RunSpec, RunStatus,
    RunStore, UnitId,
};

fn degraded_config() -> Config {
    Config::default().with_mock_delay(Duration::from_millis(50))
}

/// Wraps a provider and records which units were created and stopped.
struct Tracking<O> {
    inner: O,
    created: Mutex<Vec<UnitId>>,
    stopped: Mutex<Vec<UnitId>>,
    waits: AtomicUsize,
}

impl<O> Tracking<O> {
    fn new(inner: O) -> Arc<Self> {
        Arc::new(Self {
            inner,
            created: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            waits: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl<O: Orchestrator> Orchestrator for Tracking<O> {
    async fn create_unit(&self, unit_type: &str, env: &BTreeMap<String, String>) -> UnitId {
        let unit = self.inner.create_unit(unit_type, env).await;
        self.created.lock().unwrap().push(unit.clone());
        unit
    }

    async fn exec(&self, unit_id: &UnitId, command: &[String]) {
        self.inner.exec(unit_id, command).await;
    }

    async fn wait_and_fetch(
        &self,
        unit_id: &UnitId,
        timeout: Duration,
    ) -> Result<Artifacts, OrchestratorError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        self.inner.wait_and_fetch(unit_id, timeout).await
    }

    async fn stop_unit(&self, unit_id: &UnitId) {
        self.stopped.lock().unwrap().push(unit_id.clone());
        self.inner.stop_unit(unit_id).await;
    }
}

#[tokio::test]
async fn test_degraded_run_succeeds_with_mock_metrics() {
    let config = degraded_config();
    let provider = Tracking::new(RunPod::from_config(&config).unwrap());
    let service = RunService::new(RunStore::new(), provider.clone(), config);

    let run_id = service
        .start_run(RunSpec::new("l4-24gb", "mock-v0", 8))
        .unwrap();

    let pending = service.get_run(&run_id).unwrap();
    assert!(matches!(pending.status, RunStatus::Pending | RunStatus::Running));
    assert!(pending.finished_at.is_none());

    let run = service
        .wait_for_completion(&run_id, Duration::from_secs(10))
        .await
        .unwrap();
    service.shutdown().await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.finished_at.is_some());
    assert!(run.error.is_none());

    let metrics = run.metrics.unwrap();
    assert!(metrics.latency_p50_ms >= 0.0);
    assert!(metrics.latency_p95_ms >= 0.0);
    assert!(metrics.throughput_rps > 0.0);
    assert!(!run.artifacts[ARTIFACT_RESULT_JSON].is_empty());
    assert!(run.artifacts[ARTIFACT_GPU_CSV].starts_with("t,gpu_util,mem_util,vram_mb,power_w,temp_c"));

    let created = provider.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert!(created[0].as_str().starts_with(PLACEHOLDER_PREFIX));
    assert_eq!(*provider.stopped.lock().unwrap(), created);
}

#[tokio::test]
async fn test_many_runs_progress_independently() {
    let config = degraded_config();
    let provider = Tracking::new(RunPod::from_config(&config).unwrap());
    let service = RunService::new(RunStore::new(), provider.clone(), config);

    let ids: Vec<_> = (1..=10)
        .map(|n| {
            service
                .start_run(RunSpec::new("l4-24gb", format!("model-{n}"), n))
                .unwrap()
        })
        .collect();
    service.shutdown().await;

    for id in &ids {
        assert_eq!(service.get_run(id).unwrap().status, RunStatus::Succeeded);
    }
    assert_eq!(provider.waits.load(Ordering::SeqCst), 10);

    let mut created = provider.created.lock().unwrap().clone();
    let mut stopped = provider.stopped.lock().unwrap().clone();
    created.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    stopped.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    assert_eq!(created, stopped);
}

#[tokio::test]
async fn test_unreachable_provider_degrades_to_placeholder() {
    let config = degraded_config()
        .with_api_key(Some("key".to_string()))
        .with_base_url("http://127.0.0.1:9");
    let provider = Tracking::new(RunPod::from_config(&config).unwrap());
    let service = RunService::new(RunStore::new(), provider.clone(), config);

    let run_id = service
        .start_run(RunSpec::new("l4-24gb", "mock-v0", 8))
        .unwrap();
    service.shutdown().await;

    assert_eq!(service.get_run(&run_id).unwrap().status, RunStatus::Succeeded);
    assert!(provider.created.lock().unwrap()[0].is_placeholder());
    assert_eq!(provider.stopped.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_right_after_start_releases_units() {
    let config = degraded_config();
    let provider = Tracking::new(RunPod::from_config(&config).unwrap());
    let service = RunService::new(RunStore::new(), provider.clone(), config);

    let run_id = service
        .start_run(RunSpec::new("l4-24gb", "mock-v0", 8))
        .unwrap();
    let canceled = service.cancel(&run_id);
    service.shutdown().await;

    let run = service.get_run(&run_id).unwrap();
    if canceled.is_ok() {
        assert_eq!(run.status, RunStatus::Canceled);
        assert!(run.metrics.is_none());
    }
    // Any unit that was created was also released.
    assert_eq!(
        provider.created.lock().unwrap().len(),
        provider.stopped.lock().unwrap().len()
    );
}

#[test]
fn test_default_config_targets_public_api_base_url() {
    let config = Config::default();
    assert_eq!(config.runpod_base_url, API_BASE_URL);
    assert!(API_BASE_URL.starts_with("https://"));
    assert_eq!(config.provider_mode(), "degraded");
}
