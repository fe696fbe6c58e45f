//! Benchpod CLI - GPU benchmark run orchestration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use benchpod::config::{DEFAULT_AGENT_IMAGE, DEFAULT_BIND_ADDR, DEFAULT_SERVICE_URL_BASE};
use benchpod::providers::runpod::API_BASE_URL;
use benchpod::{api, Config, InMemoryArtifactStore, RunPod, RunService, RunSpec, RunStatus, RunStore};

/// Benchpod CLI - Provision GPU pods and benchmark workloads on them.
#[derive(Parser)]
#[command(name = "benchpod")]
#[command(about = "Run GPU benchmark workloads on ephemeral cloud pods")]
struct Cli {
    /// RunPod API key (or set `RUNPOD_API_KEY` env var). Omit for degraded mode.
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true)]
    runpod_api_key: Option<String>,

    /// RunPod API base URL.
    #[arg(long, env = "RUNPOD_BASE_URL", default_value = API_BASE_URL)]
    runpod_base_url: String,

    /// Probe container image.
    #[arg(long, env = "BENCHPOD_IMAGE_AGENT", default_value = DEFAULT_AGENT_IMAGE)]
    agent_image: String,

    /// Seconds a run waits for its pod to finish.
    #[arg(long, env = "BENCHPOD_REQUEST_TIMEOUT_S", default_value = "900")]
    request_timeout_secs: u64,

    /// Base URL for deployed model endpoints.
    #[arg(long, default_value = DEFAULT_SERVICE_URL_BASE)]
    service_url_base: String,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, default_value = "false")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API.
    Serve {
        /// Address to bind.
        #[arg(long, env = "BENCHPOD_BIND", default_value = DEFAULT_BIND_ADDR)]
        bind: String,
    },

    /// Run one benchmark in-process and print the result.
    Run {
        /// GPU type identifier.
        #[arg(long, default_value = "l4-24gb")]
        gpu_type: String,

        /// Model reference handed to the probe.
        #[arg(long, default_value = "mock-v0")]
        model_ref: String,

        /// Number of timed samples.
        #[arg(long, default_value = "8")]
        samples: u32,

        /// Optional dataset profile.
        #[arg(long)]
        dataset_profile: Option<String>,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config::default()
            .with_api_key(self.runpod_api_key.clone())
            .with_base_url(self.runpod_base_url.clone())
            .with_agent_image(self.agent_image.clone())
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_service_url_base(self.service_url_base.clone())
    }
}

fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = cli.config();
    let provider = RunPod::from_config(&config).context("Failed to create RunPod provider")?;
    info!(provider = config.provider_mode(), image = %config.agent_image, "Provider ready");

    match cli.command {
        Commands::Serve { bind } => {
            let config = config.with_bind_addr(bind);
            let addr = config.bind_addr.clone();
            let service = RunService::new(RunStore::new(), Arc::new(provider), config)
                .with_artifact_store(Arc::new(InMemoryArtifactStore::new()));

            api::run_server(service, &addr).await?;
        }

        Commands::Run {
            gpu_type,
            model_ref,
            samples,
            dataset_profile,
        } => {
            let wait = config.request_timeout.saturating_add(Duration::from_secs(60));
            let service = RunService::new(RunStore::new(), Arc::new(provider), config);

            let mut spec = RunSpec::new(gpu_type, model_ref, samples);
            spec.dataset_profile = dataset_profile;
            let run_id = service.start_run(spec).context("Run rejected")?;
            println!("⏳ Run {run_id} started...");

            let run = service.wait_for_completion(&run_id, wait).await?;
            service.shutdown().await;

            println!("\n{} Run {} {}", status_emoji(run.status), run.id, run.status);
            if let Some(metrics) = run.metrics {
                println!("   Samples:    {}", metrics.samples);
                println!("   p50:        {:.3} ms", metrics.latency_p50_ms);
                println!("   p95:        {:.3} ms", metrics.latency_p95_ms);
                println!("   Throughput: {:.3} req/s", metrics.throughput_rps);
            }
            if let Some(error) = &run.error {
                println!("   Error:      {error}");
            }

            if run.status != RunStatus::Succeeded {
                anyhow::bail!("Run {} ended as {}", run.id, run.status);
            }
        }
    }

    Ok(())
}

const fn status_emoji(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Succeeded => "✅",
        RunStatus::Failed => "❌",
        RunStatus::Canceled => "🚫",
        _ => "⏳",
    }
}
