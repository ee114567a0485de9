use uuid::Uuid;

/// A planned output fragment on disk (§3). Write-once metadata created at planning time; the
/// file itself is materialised later by whichever worker runs the owning job.
///
/// Identity is `(correlation_id, target_index, number)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub correlation_id: Uuid,
    pub target_index: u32,
    pub number: u32,
    pub filename: String,
}
