//! Durable persistence for requests, jobs, and parts (§4.3). `JobRepository` is a trait so the
//! core decomposition/dispatch logic in [`crate::dispatcher`] and [`crate::request_service`]
//! never depends on a concrete storage engine; [`memory::InMemoryJobRepository`] backs tests and
//! local smoke runs, [`postgres::PgJobRepository`] backs a real deployment.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::domain::{NewJob, Part, Request};
use crate::error::Result;

pub use memory::InMemoryJobRepository;
#[cfg(feature = "postgres")]
pub use postgres::PgJobRepository;

/// The row `claim_next` hands back to a successful claimer: just enough to build a
/// [`crate::dispatcher::TranscodingJob`] without a second round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: i64,
    pub arguments: String,
    pub correlation_id: Uuid,
}

/// Persistence contract the job plane requires (§4.3). Every mutating method is documented as
/// atomic in the spec; implementations must run inside a serializable transaction (or the
/// engine's strongest available isolation) and the `claim_next` row update must be an atomic
/// conditional update so two concurrent claimers can never both succeed on the same row.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Atomically persists a request together with all of its jobs and parts. On any failure,
    /// nothing is committed.
    async fn add_request(
        &self,
        request: Request,
        jobs: Vec<NewJob>,
        parts: Vec<Part>,
    ) -> Result<Uuid>;

    /// Selects one dispatchable job (§3 invariant), ordered by deadline ascending with id as a
    /// stable tiebreak, marks it taken, stamps its heartbeat as `now`, and returns it. Returns
    /// `Ok(None)` when nothing is dispatchable. A lost race (the conditional update affected zero
    /// rows) surfaces as `Error::ClaimLost`; callers do not retry within the same call.
    async fn claim_next(
        &self,
        now: DateTime<Utc>,
        lease_timeout: ChronoDuration,
    ) -> Result<Option<ClaimedJob>>;

    /// Refreshes a claimed job's heartbeat.
    async fn heartbeat(&self, job_id: i64, now: DateTime<Utc>) -> Result<()>;

    /// Transitions a job to its terminal success state.
    async fn mark_done(&self, job_id: i64) -> Result<()>;

    /// Transitions a job to its terminal failure state. `reason` is recorded for operators (the
    /// schema carries no failure-reason column, per §4.3; see DESIGN.md for why this deactivates
    /// the job rather than introducing a new persisted field).
    async fn mark_failed(&self, job_id: i64, reason: &str) -> Result<()>;

    /// Deactivates every not-yet-taken, not-yet-done job belonging to `correlation_id`. Returns
    /// the count affected. Never transitions a `taken = true` job (§8 property 6).
    async fn pause(&self, correlation_id: Uuid) -> Result<u64>;

    /// Upserts a worker liveness row.
    async fn record_worker_heartbeat(&self, machine_name: &str, now: DateTime<Utc>) -> Result<()>;
}
