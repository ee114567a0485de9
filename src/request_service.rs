//! Orchestrates decomposition + persistence for incoming requests (§4.5). Validates filesystem
//! preconditions, probes the video source, calls the planner, then persists atomically through
//! `JobRepository`. Nothing is persisted on validation or probe failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{JobKind, MuxRequest, NewJob, Request, TargetRendition};
use crate::error::{Error, Result};
use crate::media_probe::{MediaProbe, ProbedMetadata};
use crate::planner;

/// Hook for recording per-kind submission activity against whatever metrics registry the
/// embedding binary uses, mirroring [`crate::dispatcher::DispatchMetrics`]. Defaults to a no-op
/// so library consumers aren't forced to wire one up.
pub trait SubmitMetrics: Send + Sync {
    fn record_job_submitted(&self, kind: JobKind) {
        let _ = kind;
    }
}

struct NoopSubmitMetrics;
impl SubmitMetrics for NoopSubmitMetrics {}

/// The HTTP-layer `JobRequest` (§6) before it becomes a durable [`Request`] with an assigned
/// correlation id.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub video_source: Option<String>,
    pub audio_source: Option<String>,
    pub destination: String,
    pub needed: DateTime<Utc>,
    pub enable_dash: bool,
    pub has_alternate_audio: bool,
    pub targets: Vec<TargetRendition>,
}

/// The HTTP-layer `MuxJobRequest` (§6) before planning.
#[derive(Debug, Clone)]
pub struct SubmitMuxRequest {
    pub video_source: String,
    pub audio_source: String,
    pub destination_filename: String,
    pub output_folder: String,
    pub needed: DateTime<Utc>,
    pub inpoint: Option<Duration>,
}

/// Orchestrates request decomposition and persistence (§4.5).
pub struct RequestService {
    repository: Arc<dyn crate::repository::JobRepository>,
    media_probe: Arc<dyn MediaProbe>,
    config: Config,
    metrics: Arc<dyn SubmitMetrics>,
}

impl RequestService {
    pub fn new(
        repository: Arc<dyn crate::repository::JobRepository>,
        media_probe: Arc<dyn MediaProbe>,
        config: Config,
    ) -> Self {
        Self {
            repository,
            media_probe,
            config,
            metrics: Arc::new(NoopSubmitMetrics),
        }
    }

    /// Attaches a metrics sink; replaces the no-op default.
    pub fn with_metrics(mut self, metrics: Arc<dyn SubmitMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validates, probes, plans, and atomically persists a transcode request. Returns the new
    /// correlation id.
    #[tracing::instrument(skip(self, input), fields(destination = %input.destination))]
    pub async fn submit(&self, input: SubmitRequest) -> Result<Uuid> {
        if input.video_source.is_none() && input.audio_source.is_none() {
            return Err(Error::bad_request(
                "at least one of video_source or audio_source is required",
            ));
        }
        if input.targets.is_empty() {
            return Err(Error::bad_request("targets must not be empty"));
        }
        validate_source_exists(input.video_source.as_deref())?;
        validate_source_exists(input.audio_source.as_deref())?;
        validate_destination_folder(&input.destination)?;

        let metadata = match input.video_source.as_deref() {
            Some(path) => self.media_probe.probe(path).await?,
            None => ProbedMetadata {
                duration_seconds: 0,
                framerate: 0.0,
            },
        };

        let correlation_id = Uuid::new_v4();
        let request = Request {
            correlation_id,
            video_source: input.video_source,
            audio_source: input.audio_source,
            destination: input.destination,
            needed: input.needed,
            enable_dash: input.enable_dash,
            has_alternate_audio: input.has_alternate_audio,
            targets: input.targets,
        };

        let plan = planner::plan(&request, metadata, &self.config);
        let job_count = plan.jobs.len();
        for job in &plan.jobs {
            self.metrics.record_job_submitted(job.kind);
        }
        let jobs: Vec<NewJob> = plan.jobs.into_iter().map(Into::into).collect();

        self.repository
            .add_request(request, jobs, plan.parts)
            .await?;

        tracing::info!(%correlation_id, job_count, "request submitted");
        Ok(correlation_id)
    }

    /// Validates, probes, plans, and persists a mux request. Mux requests carry no Parts: there
    /// is exactly one output file, already named by the request itself (§4.5).
    #[tracing::instrument(skip(self, input), fields(destination_filename = %input.destination_filename))]
    pub async fn submit_mux(&self, input: SubmitMuxRequest) -> Result<Uuid> {
        validate_source_exists(Some(&input.video_source))?;
        validate_source_exists(Some(&input.audio_source))?;
        if !Path::new(&input.output_folder).is_dir() {
            return Err(Error::DestinationInvalid(input.output_folder));
        }

        let metadata = self.media_probe.probe(&input.video_source).await?;

        let correlation_id = Uuid::new_v4();
        let mux_request = MuxRequest {
            video_source: input.video_source.clone(),
            audio_source: input.audio_source.clone(),
            output_folder: input.output_folder.clone(),
            destination_filename: input.destination_filename.clone(),
            needed: input.needed,
            inpoint: input.inpoint,
        };
        let planned_job = planner::plan_mux(&mux_request, metadata.duration_seconds);
        self.metrics.record_job_submitted(planned_job.kind);

        let destination = format!(
            "{}/{}",
            input.output_folder.trim_end_matches('/'),
            input.destination_filename
        );
        let request = Request {
            correlation_id,
            video_source: Some(input.video_source),
            audio_source: Some(input.audio_source),
            destination,
            needed: input.needed,
            enable_dash: false,
            has_alternate_audio: true,
            targets: Vec::new(),
        };

        self.repository
            .add_request(request, vec![planned_job.into()], Vec::new())
            .await?;

        tracing::info!(%correlation_id, "mux request submitted");
        Ok(correlation_id)
    }
}

fn validate_source_exists(path: Option<&str>) -> Result<()> {
    if let Some(path) = path
        && !Path::new(path).exists()
    {
        return Err(Error::SourceNotFound(path.to_string()));
    }
    Ok(())
}

fn validate_destination_folder(destination: &str) -> Result<()> {
    let (folder, _, _) = planner::split_destination(destination);
    if !Path::new(&folder).is_dir() {
        return Err(Error::DestinationInvalid(folder));
    }
    Ok(())
}
