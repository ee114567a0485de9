use std::time::Duration;

use chrono::Duration as ChronoDuration;

/// Job-plane configuration (§6).
///
/// This is plain data threaded explicitly into the repository/dispatcher/request-service
/// constructors; there is no process-wide config singleton. The CLI binary is responsible for
/// mapping flags/env vars into this type (see `src/bin/jobplane-server/main.rs`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Lease timeout `T_lease`. A claimed job becomes dispatchable again once its heartbeat is
    /// older than this.
    pub lease_timeout: Duration,

    /// Selects the constant-rate-factor encoding tail over constant-bitrate. Ignored whenever a
    /// request has DASH enabled (DASH always wins).
    pub enable_crf: bool,

    /// Interface the HTTP server binds to.
    pub host: String,

    /// TCP port the HTTP server listens on.
    pub port: u16,

    /// Upper bound on a single HTTP request, covering a stuck `ffprobe` invocation.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(300),
            enable_crf: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl Config {
    /// `lease_timeout` rendered as a [`chrono::Duration`], the form [`crate::domain::Job`] and
    /// the repository's `now`-comparisons need.
    pub fn lease_timeout_chrono(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.lease_timeout).unwrap_or(ChronoDuration::seconds(300))
    }
}
