use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use jobplane::domain::TargetRendition;
use jobplane::media_probe::FfprobeMediaProbe;
use jobplane::repository::{InMemoryJobRepository, JobRepository, PgJobRepository};
use jobplane::{Config, Dispatcher, Error, RequestService, SubmitMuxRequest, SubmitRequest};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};
use uuid::Uuid;

mod metrics;

use metrics::PrometheusMetrics;

#[derive(Parser, Debug)]
#[command(name = "jobplane-server")]
#[command(about = "Coordination server for a farm of media transcoding/muxing workers")]
struct Params {
    /// Interface to bind the HTTP server to.
    #[arg(long = "host", env = "JOBPLANE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", env = "JOBPLANE_PORT", default_value_t = 8080)]
    port: u16,

    /// Lease timeout `T_lease` for reclaiming jobs from unresponsive workers.
    #[arg(
        long = "lease-timeout-seconds",
        env = "JOBPLANE_LEASE_TIMEOUT_SECONDS",
        default_value_t = 300
    )]
    lease_timeout_seconds: u64,

    /// Select the constant-rate-factor encoding tail over constant-bitrate (ignored when DASH is
    /// requested).
    #[arg(long = "enable-crf", env = "JOBPLANE_ENABLE_CRF")]
    enable_crf: bool,

    /// Postgres connection string for `JobRepository`. Required unless `--in-memory` is passed.
    #[arg(long = "database-url", env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Runs with the in-memory repository instead of Postgres. Intended for local smoke-testing.
    #[arg(long = "in-memory")]
    in_memory: bool,

    /// Upper bound on any single HTTP request, covering a stuck `ffprobe` invocation.
    #[arg(
        long = "request-timeout-seconds",
        env = "JOBPLANE_REQUEST_TIMEOUT_SECONDS",
        default_value_t = 120
    )]
    request_timeout_seconds: u64,
}

#[derive(Clone)]
struct AppState {
    request_service: Arc<RequestService>,
    dispatcher: Arc<Dispatcher>,
}

#[tokio::main]
async fn main() {
    jobplane::init_logging();

    if let Err(err) = run().await {
        error!(error = ?err, "jobplane-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    if let Err(err) = metrics::init() {
        tracing::warn!(error = ?err, "metrics disabled (init failed)");
    }

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let config = Config {
        lease_timeout: Duration::from_secs(params.lease_timeout_seconds),
        enable_crf: params.enable_crf,
        host: params.host.clone(),
        port: params.port,
        request_timeout: Duration::from_secs(params.request_timeout_seconds),
    };

    let repository: Arc<dyn JobRepository> = if params.in_memory {
        info!("running with the in-memory repository (not for production use)");
        Arc::new(InMemoryJobRepository::new())
    } else {
        let database_url = params
            .database_url
            .as_deref()
            .context("--database-url (or DATABASE_URL) is required unless --in-memory is set")?;
        Arc::new(
            PgJobRepository::connect(database_url)
                .await
                .context("failed to connect to postgres")?,
        )
    };

    let media_probe = Arc::new(FfprobeMediaProbe::new());

    let request_service = Arc::new(
        RequestService::new(repository.clone(), media_probe, config.clone())
            .with_metrics(Arc::new(PrometheusMetrics)),
    );
    let dispatcher = Arc::new(
        Dispatcher::new(repository, config.lease_timeout_chrono())
            .with_metrics(Arc::new(PrometheusMetrics)),
    );

    let state = AppState {
        request_service,
        dispatcher,
    };

    let app = Router::new()
        .route("/v1/requests", post(submit))
        .route("/v1/requests/mux", post(submit_mux))
        .route("/v1/jobs/next", post(next_job))
        .route("/v1/jobs/{id}/heartbeat", post(heartbeat))
        .route("/v1/jobs/{id}/done", post(mark_done))
        .route("/v1/jobs/{id}/failed", post(mark_failed))
        .route("/v1/requests/{correlation_id}/pause", post(pause))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetRenditionDto {
    width: u32,
    height: u32,
    video_bitrate: u32,
    audio_bitrate: u32,
}

impl From<TargetRenditionDto> for TargetRendition {
    fn from(dto: TargetRenditionDto) -> Self {
        TargetRendition {
            width: dto.width,
            height: dto.height,
            video_bitrate_kbps: dto.video_bitrate,
            audio_bitrate_kbps: dto.audio_bitrate,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequestDto {
    video_source_filename: Option<String>,
    audio_source_filename: Option<String>,
    destination_filename: String,
    needed: DateTime<Utc>,
    #[serde(default)]
    enable_dash: bool,
    #[serde(default)]
    has_alternate_audio: bool,
    targets: Vec<TargetRenditionDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitMuxRequestDto {
    video_source_filename: String,
    audio_source_filename: String,
    destination_filename: String,
    output_folder: String,
    needed: DateTime<Utc>,
    /// Seconds into the video source the mux should start from.
    #[serde(default)]
    inpoint: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationIdResponse {
    correlation_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextJobRequestDto {
    machine_name: String,
}

#[derive(Debug, Deserialize)]
struct MarkFailedDto {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PauseResponse {
    paused: u64,
}

async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitRequestDto>,
) -> std::result::Result<Json<CorrelationIdResponse>, Error> {
    let correlation_id = state
        .request_service
        .submit(SubmitRequest {
            video_source: body.video_source_filename,
            audio_source: body.audio_source_filename,
            destination: body.destination_filename,
            needed: body.needed,
            enable_dash: body.enable_dash,
            has_alternate_audio: body.has_alternate_audio,
            targets: body.targets.into_iter().map(Into::into).collect(),
        })
        .await?;

    Ok(Json(CorrelationIdResponse { correlation_id }))
}

async fn submit_mux(
    State(state): State<AppState>,
    Json(body): Json<SubmitMuxRequestDto>,
) -> std::result::Result<Json<CorrelationIdResponse>, Error> {
    let correlation_id = state
        .request_service
        .submit_mux(SubmitMuxRequest {
            video_source: body.video_source_filename,
            audio_source: body.audio_source_filename,
            destination_filename: body.destination_filename,
            output_folder: body.output_folder,
            needed: body.needed,
            inpoint: body.inpoint.map(Duration::from_secs),
        })
        .await?;

    Ok(Json(CorrelationIdResponse { correlation_id }))
}

async fn next_job(
    State(state): State<AppState>,
    Json(body): Json<NextJobRequestDto>,
) -> std::result::Result<Response, Error> {
    match state.dispatcher.next_job(&body.machine_name).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> std::result::Result<StatusCode, Error> {
    state.dispatcher.heartbeat(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_done(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> std::result::Result<StatusCode, Error> {
    state.dispatcher.mark_done(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_failed(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(body): Json<MarkFailedDto>,
) -> std::result::Result<StatusCode, Error> {
    state.dispatcher.mark_failed(job_id, &body.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
) -> std::result::Result<Json<PauseResponse>, Error> {
    let paused = state.dispatcher.pause(correlation_id).await?;
    Ok(Json(PauseResponse { paused }))
}
