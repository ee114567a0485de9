//! Transactional lease state machine over [`crate::repository::JobRepository`] (§4.4). Selects,
//! claims, reclaims, and serves jobs to polling workers. The dispatcher carries no internal
//! background loop -- reclaiming an expired lease is a side effect of the next `claim_next` call
//! selecting that row again, not a scheduled sweep.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::repository::JobRepository;

/// What a worker receives from [`Dispatcher::next_job`] (§6 `TranscodingJob`). Serialized in
/// `camelCase` to match the HTTP JSON contract (`{"id", "arguments", "jobCorrelationId"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodingJob {
    pub id: i64,
    pub arguments: String,
    pub job_correlation_id: Uuid,
}

/// Hook for recording dispatch activity against whatever metrics registry the embedding binary
/// uses (§4.4: "records each successful claim and each `ClaimLost` race against the metrics
/// registry"). The core dispatcher stays decoupled from any specific metrics crate; the default
/// is a no-op so library consumers aren't forced to wire one up.
pub trait DispatchMetrics: Send + Sync {
    fn record_claim(&self) {}
    fn record_claim_lost(&self) {}
}

struct NoopMetrics;
impl DispatchMetrics for NoopMetrics {}

/// Transactional lease state machine over a [`JobRepository`] (§4.4).
pub struct Dispatcher {
    repository: Arc<dyn JobRepository>,
    lease_timeout: ChronoDuration,
    metrics: Arc<dyn DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(repository: Arc<dyn JobRepository>, lease_timeout: ChronoDuration) -> Self {
        Self {
            repository,
            lease_timeout,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Attaches a metrics sink; replaces the no-op default.
    pub fn with_metrics(mut self, metrics: Arc<dyn DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Runs a transactional select-then-claim against the repository and returns one runnable
    /// unit job, or `None` when nothing is dispatchable. Records the worker's heartbeat as a side
    /// effect whether or not a job was returned, so an operator can see which machines are
    /// polling even during a quiet queue.
    #[tracing::instrument(skip(self), fields(machine_name))]
    pub async fn next_job(&self, machine_name: &str) -> Result<Option<TranscodingJob>> {
        if machine_name.trim().is_empty() {
            return Err(Error::bad_request("machine name must not be empty"));
        }

        let now = Utc::now();
        self.repository.record_worker_heartbeat(machine_name, now).await?;

        match self.repository.claim_next(now, self.lease_timeout).await {
            Ok(Some(claimed)) => {
                self.metrics.record_claim();
                tracing::debug!(job_id = claimed.id, %machine_name, "claimed job");
                Ok(Some(TranscodingJob {
                    id: claimed.id,
                    arguments: claimed.arguments,
                    job_correlation_id: claimed.correlation_id,
                }))
            }
            Ok(None) => Ok(None),
            Err(err) if err.is_claim_lost() => {
                self.metrics.record_claim_lost();
                tracing::debug!(%machine_name, "claim lost, reporting no job this poll");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Worker keep-alive for a claimed job.
    pub async fn heartbeat(&self, job_id: i64) -> Result<()> {
        self.repository.heartbeat(job_id, Utc::now()).await
    }

    /// Terminal success transition.
    pub async fn mark_done(&self, job_id: i64) -> Result<()> {
        self.repository.mark_done(job_id).await
    }

    /// Terminal failure transition.
    pub async fn mark_failed(&self, job_id: i64, reason: &str) -> Result<()> {
        self.repository.mark_failed(job_id, reason).await
    }

    /// Deactivates every not-yet-taken, not-yet-done job belonging to `correlation_id`. Returns
    /// the count affected.
    pub async fn pause(&self, correlation_id: Uuid) -> Result<u64> {
        self.repository.pause(correlation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobKind, NewJob, Request, TargetRendition};
    use crate::repository::InMemoryJobRepository;

    fn request(needed: chrono::DateTime<Utc>) -> Request {
        Request {
            correlation_id: Uuid::new_v4(),
            video_source: Some("in.mp4".to_string()),
            audio_source: None,
            destination: "/dest/out.mp4".to_string(),
            needed,
            enable_dash: false,
            has_alternate_audio: false,
            targets: vec![TargetRendition {
                width: 1280,
                height: 720,
                video_bitrate_kbps: 2000,
                audio_bitrate_kbps: 128,
            }],
        }
    }

    fn job() -> NewJob {
        NewJob {
            kind: JobKind::Video,
            arguments: "-i \"in.mp4\"".to_string(),
            source: "in.mp4".to_string(),
            chunk_duration_seconds: Some(60),
        }
    }

    #[tokio::test]
    async fn rejects_empty_machine_name() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let dispatcher = Dispatcher::new(repo, ChronoDuration::seconds(300));
        let err = dispatcher.next_job("   ").await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn next_job_returns_none_on_empty_queue() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let dispatcher = Dispatcher::new(repo, ChronoDuration::seconds(300));
        assert!(dispatcher.next_job("workerA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_job_claims_and_reclaims_after_lease_expiry() {
        let repo = Arc::new(InMemoryJobRepository::new());
        repo.add_request(request(Utc::now()), vec![job()], Vec::new())
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(repo, ChronoDuration::seconds(0));

        let first = dispatcher.next_job("workerA").await.unwrap();
        assert!(first.is_some());

        // With a zero-second lease the job is immediately dispatchable again (S5: reclaimed by a
        // different worker).
        let second = dispatcher.next_job("workerB").await.unwrap();
        assert_eq!(second.unwrap().id, first.unwrap().id);
    }

    #[tokio::test]
    async fn mark_done_then_pause_reports_zero_affected() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let correlation_id = repo
            .add_request(request(Utc::now()), vec![job()], Vec::new())
            .await
            .unwrap();
        let dispatcher = Dispatcher::new(repo, ChronoDuration::seconds(300));

        let claimed = dispatcher.next_job("workerA").await.unwrap().unwrap();
        dispatcher.mark_done(claimed.id).await.unwrap();

        let paused = dispatcher.pause(correlation_id).await.unwrap();
        assert_eq!(paused, 0, "done jobs are never paused");
    }

    struct CountingMetrics {
        claims: std::sync::atomic::AtomicU64,
        lost: std::sync::atomic::AtomicU64,
    }

    impl DispatchMetrics for CountingMetrics {
        fn record_claim(&self) {
            self.claims.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn record_claim_lost(&self) {
            self.lost.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn records_successful_claims_against_the_metrics_sink() {
        let repo = Arc::new(InMemoryJobRepository::new());
        repo.add_request(request(Utc::now()), vec![job()], Vec::new())
            .await
            .unwrap();
        let metrics = Arc::new(CountingMetrics {
            claims: std::sync::atomic::AtomicU64::new(0),
            lost: std::sync::atomic::AtomicU64::new(0),
        });
        let dispatcher =
            Dispatcher::new(repo, ChronoDuration::seconds(300)).with_metrics(metrics.clone());

        dispatcher.next_job("workerA").await.unwrap();
        assert_eq!(metrics.claims.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(metrics.lost.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
