//! RunPod pods API client implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use benchpod_probe::{ProbeResult, RESULT_FILE, TELEMETRY_FILE};

use super::models::{CreatePodBody, CreatePodResponse, ExecBody, PodPhase, PodStatusResponse};
use crate::config::Config;
use crate::providers::traits::{Artifacts, Orchestrator, OrchestratorError, UnitId};

/// Base URL for the RunPod API.
pub const API_BASE_URL: &str = "https://api.runpod.io/v2";

/// Default timeout for individual API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default polling interval while waiting for a pod to finish.
const POLL_INTERVAL_SECS: u64 = 5;

/// Default simulated run time in degraded mode.
const MOCK_DELAY_MS: u64 = 1000;

/// Pod name given to every benchmark pod.
const POD_NAME: &str = "benchpod-probe";

/// Container disk size for benchmark pods.
const CONTAINER_DISK_GB: u32 = 20;

/// How the polling phase of `wait_and_fetch` ended.
enum PollOutcome {
    Completed,
    Failed(PodPhase),
    Missing,
    DeadlineReached,
}

/// RunPod GPU pod provider.
#[derive(Clone)]
pub struct RunPod {
    /// HTTP client.
    client: Client,
    /// API key; `None` selects degraded mode.
    api_key: Option<String>,
    /// API base URL.
    base_url: String,
    /// Probe container image.
    agent_image: String,
    /// Interval between status polls.
    poll_interval: Duration,
    /// Simulated run time in degraded mode.
    mock_delay: Duration,
}

impl RunPod {
    /// Create a new RunPod provider.
    ///
    /// An empty or missing `api_key` selects degraded mode.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        api_key: Option<String>,
        agent_image: impl Into<String>,
    ) -> Result<Self, OrchestratorError> {
        Self::with_request_timeout(api_key, agent_image, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    fn with_request_timeout(
        api_key: Option<String>,
        agent_image: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, OrchestratorError> {
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: API_BASE_URL.to_string(),
            agent_image: agent_image.into(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            mock_delay: Duration::from_millis(MOCK_DELAY_MS),
        })
    }

    /// Build a provider from service configuration.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        Ok(Self::with_request_timeout(
            config.runpod_api_key.clone(),
            config.agent_image.clone(),
            config.provider_request_timeout,
        )?
        .with_base_url(config.runpod_base_url.clone())
        .with_poll_interval(config.poll_interval)
        .with_mock_delay(config.mock_delay))
    }

    /// Override the API base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the status polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the simulated run time in degraded mode.
    #[must_use]
    pub fn with_mock_delay(mut self, delay: Duration) -> Self {
        self.mock_delay = delay;
        self
    }

    /// Whether the provider has credentials.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether calls for `unit_id` are served locally.
    fn is_degraded(&self, unit_id: &UnitId) -> bool {
        !self.is_configured() || unit_id.is_placeholder()
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key.as_deref().unwrap_or_default())
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request");

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make an authenticated GET request returning the raw body.
    async fn get_text(&self, path: &str) -> Result<String, OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "GET request (text)");

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else if status == StatusCode::NOT_FOUND {
            Err(OrchestratorError::NotFound(path.to_string()))
        } else {
            Err(OrchestratorError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, OrchestratorError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make an authenticated POST request that returns empty body.
    async fn post_empty<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request (empty response)");

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(OrchestratorError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Make an authenticated DELETE request.
    async fn delete(&self, path: &str) -> Result<(), OrchestratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "DELETE request");

        let response = self
            .client
            .delete(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(OrchestratorError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, OrchestratorError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                OrchestratorError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(OrchestratorError::NotFound(text))
        } else {
            Err(OrchestratorError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Canned artifacts returned in degraded mode.
    fn mock_artifacts() -> Result<Artifacts, OrchestratorError> {
        let result = ProbeResult {
            samples: 8,
            latency_p50_ms: 25.0,
            latency_p95_ms: 35.0,
            throughput_rps: 40.0,
            note: "mocked RunPod execution".to_string(),
        };

        let mut artifacts = Artifacts::new();
        artifacts.insert(RESULT_FILE.to_string(), serde_json::to_string(&result)?);
        artifacts.insert(
            TELEMETRY_FILE.to_string(),
            format!("{}\n0,50,40,1800,120,60\n", ProbeResult::telemetry_header_line()),
        );
        Ok(artifacts)
    }

    /// Poll the pod until it finishes, fails, disappears, or `deadline` passes.
    async fn poll_until_done(&self, unit_id: &UnitId, deadline: Option<Instant>) -> PollOutcome {
        let path = format!("/pods/{unit_id}");

        loop {
            match self.get::<PodStatusResponse>(&path).await {
                Ok(pod) => {
                    debug!(unit_id = %unit_id, status = %pod.desired_status, "Polling pod status");
                    if pod.desired_status.is_complete() {
                        return PollOutcome::Completed;
                    }
                    if pod.desired_status.is_failed() {
                        return PollOutcome::Failed(pod.desired_status);
                    }
                }
                Err(OrchestratorError::NotFound(_)) => return PollOutcome::Missing,
                Err(e) => warn!(unit_id = %unit_id, error = %e, "Pod status poll failed"),
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return PollOutcome::DeadlineReached;
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    /// Fetch every known artifact, skipping those that are unavailable.
    async fn fetch_artifacts(&self, unit_id: &UnitId) -> Artifacts {
        let mut artifacts = Artifacts::new();

        for name in [RESULT_FILE, TELEMETRY_FILE] {
            match self.get_text(&format!("/pods/{unit_id}/files/{name}")).await {
                Ok(content) => {
                    artifacts.insert(name.to_string(), content);
                }
                Err(e) => warn!(unit_id = %unit_id, artifact = name, error = %e, "Artifact unavailable"),
            }
        }

        artifacts
    }
}

#[async_trait]
impl Orchestrator for RunPod {
    async fn create_unit(&self, unit_type: &str, env: &BTreeMap<String, String>) -> UnitId {
        if !self.is_configured() {
            let unit_id = UnitId::placeholder();
            info!(unit_id = %unit_id, "No RunPod API key; using placeholder pod");
            return unit_id;
        }

        info!(gpu_type = %unit_type, image = %self.agent_image, "Creating pod");

        let body = CreatePodBody {
            name: POD_NAME.to_string(),
            image_name: self.agent_image.clone(),
            gpu_type_id: unit_type.to_string(),
            cloud_type: "ALL".to_string(),
            env: env.clone(),
            container_disk_in_gb: CONTAINER_DISK_GB,
        };

        match self.post::<CreatePodResponse, _>("/pods", &body).await {
            Ok(pod) => {
                info!(unit_id = %pod.id, "Pod created");
                UnitId::new(pod.id)
            }
            Err(e) => {
                let unit_id = UnitId::placeholder();
                warn!(error = %e, unit_id = %unit_id, "Pod creation failed; continuing with placeholder pod");
                unit_id
            }
        }
    }

    async fn exec(&self, unit_id: &UnitId, command: &[String]) {
        if self.is_degraded(unit_id) {
            debug!(unit_id = %unit_id, "Degraded mode; skipping exec");
            return;
        }

        let body = ExecBody {
            pod_id: unit_id.to_string(),
            command: command.to_vec(),
        };

        match self.post_empty(&format!("/pods/{unit_id}/exec"), &body).await {
            Ok(()) => info!(unit_id = %unit_id, command = ?command, "Command dispatched"),
            Err(e) => warn!(unit_id = %unit_id, error = %e, "Exec request failed"),
        }
    }

    async fn wait_and_fetch(
        &self,
        unit_id: &UnitId,
        timeout: Duration,
    ) -> Result<Artifacts, OrchestratorError> {
        if self.is_degraded(unit_id) {
            tokio::time::sleep(self.mock_delay.min(timeout)).await;
            return Self::mock_artifacts();
        }

        info!(unit_id = %unit_id, timeout_secs = timeout.as_secs(), "Waiting for pod to finish");
        // None when the timeout is too large to represent; poll without a deadline.
        let deadline = Instant::now().checked_add(timeout);

        let timed_out = match self.poll_until_done(unit_id, deadline).await {
            PollOutcome::Completed => false,
            PollOutcome::DeadlineReached => {
                warn!(unit_id = %unit_id, "Pod did not finish before timeout; fetching what is available");
                true
            }
            PollOutcome::Failed(phase) => {
                return Err(OrchestratorError::UnitFailed {
                    unit_id: unit_id.to_string(),
                    status: phase.to_string(),
                });
            }
            PollOutcome::Missing => {
                return Err(OrchestratorError::NotFound(format!("pod {unit_id}")));
            }
        };

        let artifacts = self.fetch_artifacts(unit_id).await;
        if artifacts.is_empty() {
            if timed_out {
                return Err(OrchestratorError::Timeout(timeout.as_secs()));
            }
            return Err(OrchestratorError::NotFound(format!("artifacts for pod {unit_id}")));
        }

        info!(unit_id = %unit_id, count = artifacts.len(), "Fetched artifacts");
        Ok(artifacts)
    }

    async fn stop_unit(&self, unit_id: &UnitId) {
        if self.is_degraded(unit_id) {
            debug!(unit_id = %unit_id, "Degraded mode; nothing to stop");
            return;
        }

        info!(unit_id = %unit_id, "Stopping pod");
        match self.delete(&format!("/pods/{unit_id}")).await {
            Ok(()) => info!(unit_id = %unit_id, "Pod stopped"),
            Err(e) => warn!(unit_id = %unit_id, error = %e, "Failed to stop pod"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("MODEL_REF".to_string(), "mock-v0".to_string());
        env.insert("SAMPLES".to_string(), "8".to_string());
        env
    }

    fn provider(server: &MockServer) -> RunPod {
        RunPod::new(Some("test-key".to_string()), "img:1")
            .unwrap()
            .with_base_url(server.uri())
            .with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_degraded_mode_without_api_key() {
        let provider = RunPod::new(None, "img:1")
            .unwrap()
            .with_mock_delay(Duration::from_millis(1));
        assert!(!provider.is_configured());

        let unit = provider.create_unit("l4-24gb", &env()).await;
        assert!(unit.is_placeholder());

        provider.exec(&unit, &["probe".to_string()]).await;
        let artifacts = provider
            .wait_and_fetch(&unit, Duration::from_secs(5))
            .await
            .unwrap();
        let result: ProbeResult = serde_json::from_str(&artifacts[RESULT_FILE]).unwrap();
        assert_eq!(result.samples, 8);
        assert!(artifacts[TELEMETRY_FILE].starts_with("t,gpu_util"));

        provider.stop_unit(&unit).await;
    }

    #[tokio::test]
    async fn test_blank_api_key_is_degraded() {
        let provider = RunPod::new(Some("   ".to_string()), "img:1").unwrap();
        assert!(!provider.is_configured());
    }

    #[tokio::test]
    async fn test_create_unit_posts_pod() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pods"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "gpuTypeId": "l4-24gb",
                "imageName": "img:1",
                "env": {"MODEL_REF": "mock-v0", "SAMPLES": "8"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "pod-123"})))
            .expect(1)
            .mount(&server)
            .await;

        let unit = provider(&server).create_unit("l4-24gb", &env()).await;
        assert_eq!(unit.as_str(), "pod-123");
        assert!(!unit.is_placeholder());
    }

    #[tokio::test]
    async fn test_create_unit_falls_back_to_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pods"))
            .respond_with(ResponseTemplate::new(503).set_body_string("capacity"))
            .mount(&server)
            .await;

        let unit = provider(&server).create_unit("l4-24gb", &env()).await;
        assert!(unit.is_placeholder());
    }

    #[tokio::test]
    async fn test_create_unit_unreachable_provider() {
        let provider = RunPod::new(Some("test-key".to_string()), "img:1")
            .unwrap()
            .with_base_url("http://127.0.0.1:9");
        let unit = provider.create_unit("l4-24gb", &env()).await;
        assert!(unit.is_placeholder());
    }

    #[tokio::test]
    async fn test_exec_failure_is_absorbed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pods/pod-1/exec"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server)
            .exec(&UnitId::new("pod-1"), &["probe".to_string(), "run".to_string()])
            .await;
    }

    #[tokio::test]
    async fn test_wait_and_fetch_after_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "EXITED"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1/files/result.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"samples": 8}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1/files/gpu_timeseries.csv"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let artifacts = provider(&server)
            .wait_and_fetch(&UnitId::new("pod-1"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[RESULT_FILE], r#"{"samples": 8}"#);
    }

    #[tokio::test]
    async fn test_wait_and_fetch_with_unbounded_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "RUNNING"})),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "EXITED"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1/files/result.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"samples": 8}"#))
            .mount(&server)
            .await;

        let artifacts = provider(&server)
            .wait_and_fetch(&UnitId::new("pod-1"), Duration::MAX)
            .await
            .unwrap();
        assert_eq!(artifacts[RESULT_FILE], r#"{"samples": 8}"#);
    }

    #[tokio::test]
    async fn test_wait_and_fetch_failed_pod() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "FAILED"})),
            )
            .mount(&server)
            .await;

        let err = provider(&server)
            .wait_and_fetch(&UnitId::new("pod-1"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnitFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_and_fetch_timeout_without_artifacts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "RUNNING"})),
            )
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = provider(&server)
            .wait_and_fetch(&UnitId::new("pod-1"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_wait_and_fetch_timeout_returns_partial_artifacts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pod-1", "desiredStatus": "RUNNING"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/pods/pod-1/files/gpu_timeseries.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("t,gpu_util,mem_util,vram_mb,power_w,temp_c\n"))
            .mount(&server)
            .await;

        let artifacts = provider(&server)
            .wait_and_fetch(&UnitId::new("pod-1"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!artifacts.contains_key(RESULT_FILE));
        assert!(artifacts.contains_key(TELEMETRY_FILE));
    }

    #[tokio::test]
    async fn test_stop_unit_tolerates_missing_pod() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/pods/pod-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server).stop_unit(&UnitId::new("pod-1")).await;
    }

    #[tokio::test]
    async fn test_stop_unit_skips_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        provider(&server).stop_unit(&UnitId::placeholder()).await;
    }
}
