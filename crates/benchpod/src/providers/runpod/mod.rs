//! RunPod GPU pod provider.
//!
//! Implements the [`Orchestrator`](crate::providers::Orchestrator) trait
//! against the RunPod pods API.
//!
//! ## Degraded mode
//!
//! Without an API key, or when pod creation fails, the provider hands out
//! `mock-pod-<uuid>` identifiers. Every later step on such a unit is served
//! locally: `exec` and `stop_unit` do nothing and `wait_and_fetch` returns a
//! canned result, so the whole pipeline stays exercisable without a cloud
//! account.
//!
//! ## Example
//!
//! ```ignore
//! use benchpod::providers::runpod::RunPod;
//! use benchpod::providers::Orchestrator;
//!
//! let provider = RunPod::new(Some(api_key), "registry/benchpod-probe:0.1")?;
//! let unit = provider.create_unit("l4-24gb", &env).await;
//! provider.exec(&unit, &["probe".into(), "run".into()]).await;
//! let artifacts = provider.wait_and_fetch(&unit, Duration::from_secs(900)).await?;
//! provider.stop_unit(&unit).await;
//! ```

mod client;
mod models;

pub use client::{RunPod, API_BASE_URL};
pub use models::*;
