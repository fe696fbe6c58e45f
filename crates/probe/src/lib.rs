//! In-pod benchmark probe.
//!
//! This crate is the remote-side counterpart of the `benchpod` control plane.
//! It runs inside a provisioned GPU pod, times a fixed number of workload
//! iterations, and writes two artifacts the controller later fetches:
//!
//! ```text
//! /workspace
//! ├── result.json          samples, latency_p50_ms, latency_p95_ms, throughput_rps, note
//! └── gpu_timeseries.csv   t,gpu_util,mem_util,vram_mb,power_w,temp_c
//! ```
//!
//! While the workload runs, a [`TelemetrySampler`] polls the device on its own
//! schedule. Telemetry is best-effort: without a usable device source the CSV
//! holds only its header and the run still completes.
//!
//! ## Example
//!
//! ```ignore
//! use benchpod_probe::{Agent, SleepWorkload};
//!
//! let agent = Agent::new("/workspace");
//! let result = agent.execute(&SleepWorkload::default(), "mock-v0", 8).await?;
//! println!("p95 = {} ms", result.latency_p95_ms);
//! ```

pub mod agent;
pub mod error;
pub mod result;
pub mod runner;
pub mod telemetry;

pub use agent::Agent;
pub use error::ProbeError;
pub use result::{ProbeResult, RESULT_FILE, TELEMETRY_FILE, TELEMETRY_HEADER};
pub use runner::{percentile, run_probe, Measurement, SleepWorkload, Workload};
pub use telemetry::{GpuSample, NvidiaSmi, TelemetryHandle, TelemetrySampler, TelemetrySource};
