//! In-memory `JobRepository`: tests and local smoke runs (§8 ambient stack). There is no second
//! process to race against within one binary, so the scan-and-claim critical section is guarded
//! by a single mutex rather than a transactional storage engine.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::domain::{Job, JobKind, NewJob, Part, Request, WorkerHeartbeat};
use crate::error::{Error, Result};

use super::{ClaimedJob, JobRepository};

#[derive(Default)]
struct Tables {
    requests: HashMap<Uuid, Request>,
    jobs: Vec<Job>,
    parts: Vec<Part>,
    worker_heartbeats: HashMap<String, WorkerHeartbeat>,
    next_job_id: i64,
}

/// In-memory implementation of [`JobRepository`]. Cheap to construct, `Send + Sync`, suitable for
/// embedding directly in a binary run with `--in-memory` or in unit/integration tests.
#[derive(Default)]
pub struct InMemoryJobRepository {
    tables: Mutex<Tables>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn add_request(
        &self,
        request: Request,
        jobs: Vec<NewJob>,
        parts: Vec<Part>,
    ) -> Result<Uuid> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");

        let correlation_id = request.correlation_id;
        let needed = request.needed;

        for new_job in jobs {
            let id = tables.next_job_id;
            tables.next_job_id += 1;
            tables.jobs.push(Job {
                id,
                correlation_id,
                kind: new_job.kind,
                arguments: new_job.arguments,
                needed,
                source: new_job.source,
                chunk_duration_seconds: new_job.chunk_duration_seconds,
                active: true,
                taken: false,
                done: false,
                heartbeat: None,
            });
        }

        tables.parts.extend(parts);
        tables.requests.insert(correlation_id, request);

        Ok(correlation_id)
    }

    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_timeout: ChronoDuration,
    ) -> Result<Option<ClaimedJob>> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");

        let candidate_id = tables
            .jobs
            .iter()
            .filter(|job| job.is_dispatchable(now, lease_timeout))
            .min_by(|a, b| a.needed.cmp(&b.needed).then(a.id.cmp(&b.id)))
            .map(|job| job.id);

        let Some(candidate_id) = candidate_id else {
            return Ok(None);
        };

        let job = tables
            .jobs
            .iter_mut()
            .find(|job| job.id == candidate_id)
            .expect("candidate id was just selected from this same table");

        // The mutex already serializes every caller, so the "conditional update" the spec
        // requires can never actually lose a race here; re-check anyway so the invariant reads
        // the same as the transactional implementations.
        if !job.is_dispatchable(now, lease_timeout) {
            return Err(Error::ClaimLost);
        }

        job.taken = true;
        job.heartbeat = Some(now);

        Ok(Some(ClaimedJob {
            id: job.id,
            arguments: job.arguments.clone(),
            correlation_id: job.correlation_id,
        }))
    }

    async fn heartbeat(&self, job_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");
        match tables.jobs.iter_mut().find(|job| job.id == job_id) {
            Some(job) => {
                job.heartbeat = Some(now);
                Ok(())
            }
            None => Err(Error::Repository(format!("job {job_id} not found"))),
        }
    }

    async fn mark_done(&self, job_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");
        match tables.jobs.iter_mut().find(|job| job.id == job_id) {
            Some(job) => {
                job.done = true;
                Ok(())
            }
            None => Err(Error::Repository(format!("job {job_id} not found"))),
        }
    }

    async fn mark_failed(&self, job_id: i64, reason: &str) -> Result<()> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");
        match tables.jobs.iter_mut().find(|job| job.id == job_id) {
            Some(job) => {
                tracing::warn!(job_id, reason, "job marked failed");
                job.active = false;
                Ok(())
            }
            None => Err(Error::Repository(format!("job {job_id} not found"))),
        }
    }

    async fn pause(&self, correlation_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");
        let mut count = 0u64;
        for job in tables.jobs.iter_mut() {
            if job.correlation_id == correlation_id && !job.done && !job.taken {
                job.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn record_worker_heartbeat(&self, machine_name: &str, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.lock().expect("in-memory repository mutex poisoned");
        tables
            .worker_heartbeats
            .entry(machine_name.to_string())
            .and_modify(|hb| hb.last_seen = now)
            .or_insert(WorkerHeartbeat {
                machine_name: machine_name.to_string(),
                last_seen: now,
            });
        Ok(())
    }
}
