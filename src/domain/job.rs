use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of external-tool invocation a [`Job`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Audio,
    Video,
    Mux,
}

/// A unit of work runnable by a single external-tool invocation (§3).
///
/// Lease state (`active`/`taken`/`done`/`heartbeat`) lives on the row once persisted; this
/// in-memory shape mirrors exactly what the repository stores so `claim_next` can hand back a
/// fully formed value without a second round trip.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub correlation_id: Uuid,
    pub kind: JobKind,
    pub arguments: String,
    pub needed: DateTime<Utc>,
    pub source: String,
    pub chunk_duration_seconds: Option<i64>,
    pub active: bool,
    pub taken: bool,
    pub done: bool,
    pub heartbeat: Option<DateTime<Utc>>,
}

/// A freshly planned job, not yet assigned a durable id (the repository assigns `id` on
/// insert).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub arguments: String,
    pub source: String,
    pub chunk_duration_seconds: Option<i64>,
}

impl Job {
    /// §3 invariant: a job is dispatchable iff active, not done, and either never taken or its
    /// heartbeat is older than the lease timeout.
    pub fn is_dispatchable(&self, now: DateTime<Utc>, lease_timeout: chrono::Duration) -> bool {
        if !self.active || self.done {
            return false;
        }
        if !self.taken {
            return true;
        }
        match self.heartbeat {
            Some(hb) => now - hb > lease_timeout,
            None => true,
        }
    }
}
