//! GPU benchmark run orchestration.
//!
//! This crate is the control plane that provisions ephemeral GPU pods, runs
//! the `benchpod-probe` workload on them, and tracks each attempt as a
//! [`Run`] with a small lifecycle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  start_run   ┌──────────────┐  spawn   ┌──────────────────┐
//! │  HTTP / CLI  │─────────────►│  RunService  │─────────►│  execution task  │
//! └──────────────┘  (returns    └──────┬───────┘          └────────┬─────────┘
//!                    run id)           │ save / modify             │ create_unit
//!                                      ▼                           │ exec
//!                               ┌──────────────┐                   │ wait_and_fetch
//!                               │   RunStore   │◄──────────────────┤ stop_unit
//!                               └──────────────┘  terminal status  ▼
//!                                                         ┌──────────────────┐
//!                                                         │  Orchestrator    │
//!                                                         │  (RunPod pods)   │
//!                                                         └──────────────────┘
//! ```
//!
//! Without a RunPod API key the provider runs in degraded mode and returns a
//! canned result, so the full pipeline works locally.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use benchpod::{Config, RunPod, RunService, RunSpec, RunStore};
//!
//! let config = Config::default();
//! let provider = RunPod::from_config(&config)?;
//! let service = RunService::new(RunStore::new(), Arc::new(provider), config);
//!
//! let run_id = service.start_run(RunSpec::new("l4-24gb", "mock-v0", 8))?;
//! let run = service.wait_for_completion(&run_id, Duration::from_secs(30)).await?;
//! println!("{}", run.status);
//! ```

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod providers;
pub mod run;
pub mod service;
pub mod store;

pub use artifacts::{artifact_key, ArtifactStore, ArtifactStoreError, InMemoryArtifactStore};
pub use config::Config;
pub use error::{parse_run_id, RunError};
pub use providers::runpod::RunPod;
pub use providers::{Artifacts, Orchestrator, OrchestratorError, UnitId};
pub use run::{Run, RunMetrics, RunSpec, RunStatus, RunTarget};
pub use service::{PhaseUpdate, RunService};
pub use store::RunStore;
