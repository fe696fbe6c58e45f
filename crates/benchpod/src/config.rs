//! Service configuration.
//!
//! Built once at startup (from CLI flags and environment in the binary, or
//! directly in tests) and passed to the components that need it.

use std::time::Duration;

use crate::providers::runpod::API_BASE_URL;

/// Default probe container image.
pub const DEFAULT_AGENT_IMAGE: &str = "registry/benchpod-probe:0.1";

/// Default base for deployed service endpoints.
pub const DEFAULT_SERVICE_URL_BASE: &str = "http://inference.local";

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Control plane configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// RunPod API key; `None` runs the provider in degraded mode.
    pub runpod_api_key: Option<String>,
    /// RunPod API base URL.
    pub runpod_base_url: String,
    /// Probe container image.
    pub agent_image: String,
    /// How long a run waits for its compute unit to finish.
    pub request_timeout: Duration,
    /// Timeout for each individual provider HTTP request.
    pub provider_request_timeout: Duration,
    /// Interval between unit status polls.
    pub poll_interval: Duration,
    /// Simulated run time in degraded mode.
    pub mock_delay: Duration,
    /// Base URL for deployed model endpoints.
    pub service_url_base: String,
    /// HTTP bind address.
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runpod_api_key: None,
            runpod_base_url: API_BASE_URL.to_string(),
            agent_image: DEFAULT_AGENT_IMAGE.to_string(),
            request_timeout: Duration::from_secs(900),
            provider_request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(5),
            mock_delay: Duration::from_secs(1),
            service_url_base: DEFAULT_SERVICE_URL_BASE.to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Set the RunPod API key. Blank keys are treated as absent.
    #[must_use]
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.runpod_api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Set the RunPod API base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.runpod_base_url = url.into();
        self
    }

    /// Set the probe container image.
    #[must_use]
    pub fn with_agent_image(mut self, image: impl Into<String>) -> Self {
        self.agent_image = image.into();
        self
    }

    /// Set the run wait timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the status poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the degraded-mode simulated run time.
    #[must_use]
    pub const fn with_mock_delay(mut self, delay: Duration) -> Self {
        self.mock_delay = delay;
        self
    }

    /// Set the base URL for deployed endpoints.
    #[must_use]
    pub fn with_service_url_base(mut self, base: impl Into<String>) -> Self {
        self.service_url_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Whether the provider will run without credentials.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.runpod_api_key.is_none()
    }

    /// Human-readable provider mode for startup logs.
    #[must_use]
    pub const fn provider_mode(&self) -> &'static str {
        if self.is_degraded() {
            "degraded"
        } else {
            "runpod"
        }
    }

    /// Endpoint of a deployed run.
    #[must_use]
    pub fn service_url_for(&self, run_id: &uuid::Uuid) -> String {
        format!("{}/{run_id}", self.service_url_base.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.is_degraded());
        assert_eq!(config.provider_mode(), "degraded");
        assert_eq!(config.request_timeout, Duration::from_secs(900));
        assert_eq!(config.agent_image, DEFAULT_AGENT_IMAGE);
    }

    #[test]
    fn test_blank_key_stays_degraded() {
        assert!(Config::default().with_api_key(Some(String::new())).is_degraded());
        let config = Config::default().with_api_key(Some("k".to_string()));
        assert_eq!(config.provider_mode(), "runpod");
    }

    #[test]
    fn test_service_url_for() {
        let id = uuid::Uuid::new_v4();
        let config = Config::default().with_service_url_base("http://svc/");
        assert_eq!(config.service_url_for(&id), format!("http://svc/{id}"));
    }
}
