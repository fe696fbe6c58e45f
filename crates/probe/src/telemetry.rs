//! Best-effort GPU telemetry sampling.
//!
//! The sampler runs as its own task beside the workload and appends one CSV
//! row per interval. It is stopped through a shared flag and joined with a
//! bounded timeout, so a stuck device query can never hold the probe open.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::result::TELEMETRY_HEADER;

/// Default sampling interval.
const DEFAULT_INTERVAL_MS: u64 = 500;

/// Fields requested from `nvidia-smi`, in CSV column order.
const NVIDIA_SMI_QUERY: &str =
    "utilization.gpu,utilization.memory,memory.used,power.draw,temperature.gpu";

/// One telemetry reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuSample {
    /// GPU utilization percentage.
    pub gpu_util: f64,
    /// Memory controller utilization percentage.
    pub mem_util: f64,
    /// Used VRAM in MiB.
    pub vram_mb: f64,
    /// Power draw in watts.
    pub power_w: f64,
    /// Core temperature in Celsius.
    pub temp_c: f64,
}

/// Source of device telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Read the current device state.
    async fn sample(&self) -> Result<GpuSample, ProbeError>;
}

/// Reads telemetry from the first GPU via `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    binary: PathBuf,
}

impl NvidiaSmi {
    /// Use a specific `nvidia-smi` binary.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Parse one `--format=csv,noheader,nounits` line.
    ///
    /// Fields the driver reports as `[N/A]` read as zero.
    pub fn parse_line(line: &str) -> Result<GpuSample, ProbeError> {
        let fields: Vec<f64> = line
            .split(',')
            .map(|f| f.trim().parse::<f64>().unwrap_or(0.0))
            .collect();

        if fields.len() != 5 {
            return Err(ProbeError::TelemetryUnavailable(format!(
                "expected 5 fields, got {}: {line}",
                fields.len()
            )));
        }

        Ok(GpuSample {
            gpu_util: fields[0],
            mem_util: fields[1],
            vram_mb: fields[2],
            power_w: fields[3],
            temp_c: fields[4],
        })
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

#[async_trait]
impl TelemetrySource for NvidiaSmi {
    async fn sample(&self) -> Result<GpuSample, ProbeError> {
        let output = Command::new(&self.binary)
            .arg(format!("--query-gpu={NVIDIA_SMI_QUERY}"))
            .arg("--format=csv,noheader,nounits")
            .arg("--id=0")
            .output()
            .await
            .map_err(|e| ProbeError::TelemetryUnavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::TelemetryUnavailable(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next()
            .ok_or_else(|| ProbeError::TelemetryUnavailable("empty output".to_string()))?;
        Self::parse_line(line)
    }
}

/// Periodic telemetry writer.
pub struct TelemetrySampler {
    source: Arc<dyn TelemetrySource>,
    interval: Duration,
}

impl TelemetrySampler {
    /// Create a sampler over `source` with the default interval.
    #[must_use]
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self {
            source,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
        }
    }

    /// Override the sampling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start sampling into `output`; returns a handle to stop and join it.
    #[must_use]
    pub fn spawn(self, output: impl Into<PathBuf>) -> TelemetryHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let output = output.into();
        let task_stop = Arc::clone(&stop);

        let handle = tokio::spawn(async move { self.run(&output, &task_stop).await });

        TelemetryHandle { stop, handle }
    }

    async fn run(self, output: &Path, stop: &AtomicBool) -> Result<usize, ProbeError> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_writer(File::create(output)?);
        writer.write_record(TELEMETRY_HEADER)?;
        writer.flush()?;

        let start = Instant::now();
        let mut rows = 0;

        match self.source.sample().await {
            Ok(sample) => {
                write_row(&mut writer, 0.0, &sample)?;
                rows += 1;
            }
            Err(e) => {
                warn!(error = %e, "GPU telemetry not available; writing header only");
                return Ok(0);
            }
        }

        loop {
            tokio::time::sleep(self.interval).await;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            match self.source.sample().await {
                Ok(sample) => {
                    write_row(&mut writer, start.elapsed().as_secs_f64(), &sample)?;
                    rows += 1;
                }
                Err(e) => debug!(error = %e, "Telemetry sample failed, skipping"),
            }
        }

        Ok(rows)
    }
}

fn write_row(
    writer: &mut csv::Writer<File>,
    t_secs: f64,
    sample: &GpuSample,
) -> Result<(), ProbeError> {
    writer.write_record([
        format!("{:.2}", t_secs),
        format!("{}", sample.gpu_util),
        format!("{}", sample.mem_util),
        format!("{:.2}", sample.vram_mb),
        format!("{:.2}", sample.power_w),
        format!("{}", sample.temp_c),
    ])?;
    writer.flush()?;
    Ok(())
}

/// Handle to a running sampler.
pub struct TelemetryHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<usize, ProbeError>>,
}

impl TelemetryHandle {
    /// Signal the sampler to stop after its current sample.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the sampler and wait at most `timeout` for it to finish.
    ///
    /// Returns the number of data rows written. A sampler that does not
    /// finish in time is aborted; errors are logged, never returned.
    pub async fn join(self, timeout: Duration) -> usize {
        self.stop();
        let abort = self.handle.abort_handle();

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(Ok(rows))) => {
                info!(rows, "Telemetry sampler finished");
                rows
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Telemetry sampler failed");
                0
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Telemetry task panicked");
                0
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis(), "Telemetry sampler did not stop in time; aborting");
                abort.abort();
                0
            }
        }
    }
}
