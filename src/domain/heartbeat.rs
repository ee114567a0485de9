use chrono::{DateTime, Utc};

/// A worker liveness row, upserted whenever a worker polls for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHeartbeat {
    pub machine_name: String,
    pub last_seen: DateTime<Utc>,
}
