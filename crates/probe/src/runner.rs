//! Timed workload iterations and latency statistics.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ProbeError;
use crate::result::ProbeResult;

/// Default per-iteration duration of the stand-in workload.
const DEFAULT_ITERATION_MS: u64 = 20;

/// Upper bound on latency slots reserved before the first iteration.
const MAX_PREALLOCATED_SAMPLES: usize = 4096;

/// Floor applied to the total elapsed time before computing throughput.
const MIN_ELAPSED_SECS: f64 = 1e-6;

/// A unit of benchmarked work.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Run one iteration of the workload.
    async fn iterate(&self) -> Result<(), ProbeError>;
}

/// Stand-in model that sleeps for a fixed duration per iteration.
#[derive(Debug, Clone)]
pub struct SleepWorkload {
    per_iteration: Duration,
}

impl SleepWorkload {
    /// Create a workload that sleeps for `per_iteration` on each call.
    #[must_use]
    pub const fn new(per_iteration: Duration) -> Self {
        Self { per_iteration }
    }
}

impl Default for SleepWorkload {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_ITERATION_MS))
    }
}

#[async_trait]
impl Workload for SleepWorkload {
    async fn iterate(&self) -> Result<(), ProbeError> {
        tokio::time::sleep(self.per_iteration).await;
        Ok(())
    }
}

/// Raw timings collected from a probe run.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Per-iteration latencies in milliseconds, in execution order.
    pub latencies_ms: Vec<f64>,
    /// Wall-clock time across all iterations.
    pub elapsed: Duration,
}

impl Measurement {
    /// Summarize the timings into a result record.
    pub fn summarize(&self, model_ref: &str) -> Result<ProbeResult, ProbeError> {
        let p50 = percentile(&self.latencies_ms, 0.50)?;
        let p95 = percentile(&self.latencies_ms, 0.95)?;
        let elapsed_secs = self.elapsed.as_secs_f64().max(MIN_ELAPSED_SECS);
        let samples = self.latencies_ms.len();

        Ok(ProbeResult {
            samples: samples as u64,
            latency_p50_ms: round3(p50),
            latency_p95_ms: round3(p95),
            throughput_rps: round3(samples as f64 / elapsed_secs),
            note: format!("stand-in model {model_ref}; swap for a real inference server"),
        })
    }
}

/// Validate a caller-supplied sample count.
pub fn validate_samples(samples: i64) -> Result<usize, ProbeError> {
    usize::try_from(samples)
        .ok()
        .filter(|n| *n > 0)
        .ok_or(ProbeError::InvalidSamples(samples))
}

/// Time `samples` iterations of `workload`.
///
/// Rejects non-positive sample counts before running anything.
pub async fn measure<W: Workload + ?Sized>(
    workload: &W,
    samples: i64,
) -> Result<Measurement, ProbeError> {
    let count = validate_samples(samples)?;
    let mut latencies_ms = Vec::with_capacity(count.min(MAX_PREALLOCATED_SAMPLES));
    let start = Instant::now();

    for i in 0..count {
        let iter_start = Instant::now();
        workload.iterate().await?;
        let latency_ms = iter_start.elapsed().as_secs_f64() * 1000.0;
        debug!(iteration = i, latency_ms, "Iteration complete");
        latencies_ms.push(latency_ms);
    }

    Ok(Measurement {
        latencies_ms,
        elapsed: start.elapsed(),
    })
}

/// Run the probe and summarize its latency distribution.
pub async fn run_probe<W: Workload + ?Sized>(
    workload: &W,
    model_ref: &str,
    samples: i64,
) -> Result<ProbeResult, ProbeError> {
    measure(workload, samples).await?.summarize(model_ref)
}

/// Percentile with linear interpolation between the two nearest ranks.
///
/// `q` is a fraction in `[0, 1]`.
pub fn percentile(values: &[f64], q: f64) -> Result<f64, ProbeError> {
    if values.is_empty() {
        return Err(ProbeError::EmptySamples);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lower = rank.floor();
    let upper = rank.ceil();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (lo, hi) = (lower as usize, upper as usize);

    if lo == hi {
        return Ok(sorted[lo]);
    }

    Ok(sorted[lo] * (upper - rank) + sorted[hi] * (rank - lower))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
