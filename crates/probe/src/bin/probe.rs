//! Probe CLI - runs the benchmark workload inside a GPU pod.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use benchpod_probe::{Agent, NvidiaSmi, SleepWorkload};

/// Probe CLI - time workload iterations and capture GPU telemetry.
#[derive(Parser)]
#[command(name = "probe")]
#[command(about = "Run a benchmark workload and write result artifacts")]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a benchmark run.
    Run {
        /// Model reference (or set `MODEL_REF` env var).
        #[arg(long = "model", env = "MODEL_REF", default_value = "mock-v0")]
        model_ref: String,

        /// Number of timed samples (or set `SAMPLES` env var).
        #[arg(long, env = "SAMPLES", default_value = "1", allow_negative_numbers = true)]
        samples: i64,

        /// Directory receiving `result.json` and `gpu_timeseries.csv`.
        #[arg(long, env = "PROBE_WORKSPACE", default_value = "/workspace")]
        workspace: PathBuf,

        /// Path to the `nvidia-smi` binary.
        #[arg(long, default_value = "nvidia-smi")]
        nvidia_smi: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            model_ref,
            samples,
            workspace,
            nvidia_smi,
        } => {
            let agent = Agent::new(workspace).with_source(Arc::new(NvidiaSmi::new(nvidia_smi)));
            let result = agent
                .execute(&SleepWorkload::default(), &model_ref, samples)
                .await
                .context("Benchmark run failed")?;

            println!("\n✅ Run complete");
            println!("   Samples:    {}", result.samples);
            println!("   p50:        {:.3} ms", result.latency_p50_ms);
            println!("   p95:        {:.3} ms", result.latency_p95_ms);
            println!("   Throughput: {:.3} req/s", result.throughput_rps);
        }
    }

    Ok(())
}
