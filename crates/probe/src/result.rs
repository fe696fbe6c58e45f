//! Persisted artifact format shared with the controller.

use serde::{Deserialize, Serialize};

/// File name of the structured result artifact.
pub const RESULT_FILE: &str = "result.json";

/// File name of the telemetry time-series artifact.
pub const TELEMETRY_FILE: &str = "gpu_timeseries.csv";

/// Header row of the telemetry time-series.
pub const TELEMETRY_HEADER: [&str; 6] = ["t", "gpu_util", "mem_util", "vram_mb", "power_w", "temp_c"];

/// Outcome of one probe run, written as `result.json`.
///
/// Every field defaults so that a partially written record still parses;
/// the controller relies on this when reading results back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeResult {
    /// Number of timed iterations.
    pub samples: u64,
    /// Median latency in milliseconds.
    pub latency_p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub latency_p95_ms: f64,
    /// Iterations per second over the whole run.
    pub throughput_rps: f64,
    /// Free-form note.
    pub note: String,
}

impl ProbeResult {
    /// Render the telemetry header as a CSV line, without trailing newline.
    #[must_use]
    pub fn telemetry_header_line() -> String {
        TELEMETRY_HEADER.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_record_uses_defaults() {
        let parsed: ProbeResult = serde_json::from_str(r#"{"samples": 3}"#).unwrap();
        assert_eq!(parsed.samples, 3);
        assert!(parsed.latency_p50_ms.abs() < f64::EPSILON);
        assert!(parsed.note.is_empty());
    }

    #[test]
    fn test_header_line() {
        assert_eq!(
            ProbeResult::telemetry_header_line(),
            "t,gpu_util,mem_util,vram_mb,power_w,temp_c"
        );
    }
}
