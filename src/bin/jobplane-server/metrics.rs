use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jobplane::dispatcher::DispatchMetrics;
use jobplane::domain::JobKind;
use jobplane::request_service::SubmitMetrics;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts as PromOpts,
    Registry, TextEncoder,
};

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    jobs_claimed_total: IntCounter,
    claim_lost_total: IntCounter,
    jobs_submitted_total: IntCounterVec,
    dispatchable_queue_depth: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// `IntGauge` only moves in whole steps per claim/submission; a plain atomic mirrors the same
// count without needing a `&Metrics` borrow across the dispatcher/request-service trait objects.
static QUEUE_DEPTH: AtomicI64 = AtomicI64::new(0);

fn build_metrics() -> Result<Metrics> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        PromOpts::new(
            "jobplane_http_requests_total",
            "Total HTTP requests served by jobplane-server.",
        ),
        &["status"],
    )
    .context("invalid definition for jobplane_http_requests_total")?;

    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "jobplane_http_request_duration_seconds",
            "HTTP request latency in seconds.",
        ),
        &["status"],
    )
    .context("invalid definition for jobplane_http_request_duration_seconds")?;

    let http_in_flight_requests = IntGauge::new(
        "jobplane_http_in_flight_requests",
        "Current number of in-flight HTTP requests.",
    )
    .context("invalid definition for jobplane_http_in_flight_requests")?;

    let jobs_claimed_total = IntCounter::new(
        "jobplane_jobs_claimed_total",
        "Total unit jobs successfully claimed by a worker.",
    )
    .context("invalid definition for jobplane_jobs_claimed_total")?;

    let claim_lost_total = IntCounter::new(
        "jobplane_claim_lost_total",
        "Total claim attempts that raced another claimer and lost.",
    )
    .context("invalid definition for jobplane_claim_lost_total")?;

    let jobs_submitted_total = IntCounterVec::new(
        PromOpts::new(
            "jobplane_jobs_submitted_total",
            "Total unit jobs planned and persisted, by kind.",
        ),
        &["kind"],
    )
    .context("invalid definition for jobplane_jobs_submitted_total")?;

    let dispatchable_queue_depth = IntGauge::new(
        "jobplane_dispatchable_queue_depth",
        "Best-effort count of jobs submitted but not yet claimed.",
    )
    .context("invalid definition for jobplane_dispatchable_queue_depth")?;

    registry
        .register(Box::new(http_requests_total.clone()))
        .context("failed to register jobplane_http_requests_total")?;
    registry
        .register(Box::new(http_request_duration_seconds.clone()))
        .context("failed to register jobplane_http_request_duration_seconds")?;
    registry
        .register(Box::new(http_in_flight_requests.clone()))
        .context("failed to register jobplane_http_in_flight_requests")?;
    registry
        .register(Box::new(jobs_claimed_total.clone()))
        .context("failed to register jobplane_jobs_claimed_total")?;
    registry
        .register(Box::new(claim_lost_total.clone()))
        .context("failed to register jobplane_claim_lost_total")?;
    registry
        .register(Box::new(jobs_submitted_total.clone()))
        .context("failed to register jobplane_jobs_submitted_total")?;
    registry
        .register(Box::new(dispatchable_queue_depth.clone()))
        .context("failed to register jobplane_dispatchable_queue_depth")?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        http_in_flight_requests,
        jobs_claimed_total,
        claim_lost_total,
        jobs_submitted_total,
        dispatchable_queue_depth,
    })
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

pub fn init() -> Result<()> {
    if metrics().is_some() {
        return Ok(());
    }

    let built = build_metrics()?;
    let _ = METRICS.set(built);
    Ok(())
}

pub async fn prometheus_metrics() -> Response {
    if metrics().is_none()
        && let Err(err) = init()
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to initialize metrics: {err:#}"),
        )
            .into_response();
    }

    let Some(metrics) = metrics() else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics not initialized").into_response();
    };

    let families = metrics.registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/healthz" {
        return next.run(req).await;
    }

    let Some(metrics) = metrics() else {
        return next.run(req).await;
    };

    let start = Instant::now();

    metrics.http_in_flight_requests.inc();
    let response = next.run(req).await;
    metrics.http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[&status])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&status])
        .observe(start.elapsed().as_secs_f64());

    response
}

fn job_kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Audio => "audio",
        JobKind::Video => "video",
        JobKind::Mux => "mux",
    }
}

/// Wires [`jobplane::dispatcher::Dispatcher`] and [`jobplane::request_service::RequestService`]
/// claim/submission events into the process-wide Prometheus registry.
pub struct PrometheusMetrics;

impl DispatchMetrics for PrometheusMetrics {
    fn record_claim(&self) {
        if let Some(metrics) = metrics() {
            metrics.jobs_claimed_total.inc();
        }
        let depth = QUEUE_DEPTH.fetch_sub(1, Ordering::Relaxed) - 1;
        if let Some(metrics) = metrics() {
            metrics.dispatchable_queue_depth.set(depth.max(0));
        }
    }

    fn record_claim_lost(&self) {
        if let Some(metrics) = metrics() {
            metrics.claim_lost_total.inc();
        }
    }
}

impl SubmitMetrics for PrometheusMetrics {
    fn record_job_submitted(&self, kind: JobKind) {
        if let Some(metrics) = metrics() {
            metrics
                .jobs_submitted_total
                .with_label_values(&[job_kind_label(kind)])
                .inc();
        }
        let depth = QUEUE_DEPTH.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(metrics) = metrics() {
            metrics.dispatchable_queue_depth.set(depth);
        }
    }
}
