//! HTTP API over the run service.
//!
//! Provides REST endpoints for:
//! - Health checks
//! - Starting, listing, inspecting and canceling benchmark runs
//! - The upload → prepare → deploy flow
//! - Phase updates from an external monitor

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{parse_run_id, RunError};
use crate::run::{Run, RunSpec, RunStatus};
use crate::service::{PhaseUpdate, RunService};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the HTTP router.
pub fn build_router(service: RunService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/runs", get(list_runs_handler))
        .route("/runs/start", post(start_run_handler))
        .route("/runs/{run_id}", get(get_run_handler))
        .route("/runs/{run_id}/cancel", post(cancel_run_handler))
        .route("/uploads", post(upload_handler))
        .route("/prepare/start", post(prepare_handler))
        .route("/deploy/start", post(deploy_handler))
        .route("/monitor/webhook", post(webhook_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Serve the API on `listener` until `shutdown` resolves, then drain runs.
///
/// # Errors
///
/// Returns an error if the server fails while serving.
pub async fn serve(
    listener: tokio::net::TcpListener,
    service: RunService,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(service.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    service.shutdown().await;
    Ok(())
}

/// Bind `addr` and serve until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the server fails to start or bind to the address.
pub async fn run_server(service: RunService, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %addr,
        provider = service.config().provider_mode(),
        "Benchpod API listening"
    );

    serve(listener, service, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully");
    })
    .await
}

// ============================================================================
// Errors
// ============================================================================

/// Run error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(RunError);

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RunError::NotFound(_) => StatusCode::NOT_FOUND,
            RunError::AlreadyExists(_) => StatusCode::CONFLICT,
            RunError::InvalidRunId(_)
            | RunError::InvalidSpec(_)
            | RunError::InvalidTransition { .. }
            | RunError::UnknownPhase(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Request/Response types
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: &'static str,
}

/// Benchmark start request.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub gpu_type: String,
    pub model_ref: String,
    pub samples: i64,
    #[serde(default)]
    pub dataset_profile: Option<String>,
}

impl TryFrom<StartRunRequest> for RunSpec {
    type Error = RunError;

    fn try_from(req: StartRunRequest) -> std::result::Result<Self, Self::Error> {
        let samples = u32::try_from(req.samples)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                RunError::InvalidSpec(format!("samples must be a positive integer, got {}", req.samples))
            })?;
        Ok(Self {
            gpu_type: req.gpu_type,
            model_ref: req.model_ref,
            samples,
            dataset_profile: req.dataset_profile,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub artifact_key: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub run_id: String,
    pub gpu_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub run_id: String,
}

/// Phase change reported by the deployment monitor.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub run_id: String,
    pub phase: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub gpu_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub run_id: Uuid,
    pub phase: RunStatus,
}

impl From<&Run> for PhaseResponse {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id,
            phase: run.status,
        }
    }
}

#[derive(Debug, Serialize)]
struct AckResponse {
    ok: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(service): State<RunService>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: service.config().provider_mode(),
    })
}

async fn start_run_handler(
    State(service): State<RunService>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult<impl IntoResponse> {
    let spec = RunSpec::try_from(req)?;
    let run_id = service.start_run(spec)?;
    Ok((StatusCode::ACCEPTED, Json(StartRunResponse { run_id })))
}

async fn list_runs_handler(State(service): State<RunService>) -> impl IntoResponse {
    Json(service.list_runs())
}

async fn get_run_handler(
    State(service): State<RunService>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Run>> {
    let run_id = parse_run_id(&run_id)?;
    Ok(Json(service.get_run(&run_id)?))
}

async fn cancel_run_handler(
    State(service): State<RunService>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Run>> {
    let run_id = parse_run_id(&run_id)?;
    Ok(Json(service.cancel(&run_id)?))
}

async fn upload_handler(
    State(service): State<RunService>,
    Json(req): Json<UploadRequest>,
) -> ApiResult<impl IntoResponse> {
    let run_id = req.run_id.as_deref().map(parse_run_id).transpose()?;
    let run = service.create_uploaded(req.artifact_key, run_id)?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn prepare_handler(
    State(service): State<RunService>,
    Json(req): Json<PrepareRequest>,
) -> ApiResult<Json<PhaseResponse>> {
    let run_id = parse_run_id(&req.run_id)?;
    let run = service.start_prepare(&run_id, req.gpu_id)?;
    Ok(Json(PhaseResponse::from(&run)))
}

async fn deploy_handler(
    State(service): State<RunService>,
    Json(req): Json<DeployRequest>,
) -> ApiResult<Json<PhaseResponse>> {
    let run_id = parse_run_id(&req.run_id)?;
    let run = service.start_deploy(&run_id)?;
    Ok(Json(PhaseResponse::from(&run)))
}

async fn webhook_handler(
    State(service): State<RunService>,
    Json(req): Json<WebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    let run_id = parse_run_id(&req.run_id)?;
    let phase: RunStatus = req.phase.parse()?;

    service.update_phase(
        &run_id,
        PhaseUpdate {
            phase,
            gpu_id: req.gpu_id,
            service_url: req.service_url,
            progress: req.progress,
        },
    )?;
    Ok(Json(AckResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(samples: i64) -> StartRunRequest {
        StartRunRequest {
            gpu_type: "l4-24gb".to_string(),
            model_ref: "mock-v0".to_string(),
            samples,
            dataset_profile: None,
        }
    }

    #[test]
    fn test_samples_must_be_positive() {
        assert_eq!(RunSpec::try_from(request(8)).unwrap().samples, 8);
        assert!(RunSpec::try_from(request(0)).is_err());
        assert!(RunSpec::try_from(request(-3)).is_err());
        assert!(RunSpec::try_from(request(i64::from(u32::MAX) + 1)).is_err());
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: RunError| ApiError::from(e).into_response().status();
        assert_eq!(status(RunError::NotFound(Uuid::new_v4())), StatusCode::NOT_FOUND);
        assert_eq!(status(RunError::AlreadyExists(Uuid::new_v4())), StatusCode::CONFLICT);
        assert_eq!(
            status(RunError::InvalidTransition {
                from: RunStatus::Failed,
                to: RunStatus::Canceled
            }),
            StatusCode::BAD_REQUEST
        );
    }
}
