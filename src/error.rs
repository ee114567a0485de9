use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide tagged error type (§7 of the job-plane design).
///
/// Each variant maps to exactly one outcome at the HTTP boundary; nothing here is meant to be
/// pattern-matched by library consumers beyond "which bucket did this fail into".
#[derive(Debug, Error)]
pub enum Error {
    /// Validation failure: missing sources, conflicting fields, empty machine name, empty
    /// target list. Nothing is persisted.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A declared source path does not exist on the local filesystem.
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// The destination folder does not exist.
    #[error("destination invalid: {0}")]
    DestinationInvalid(String),

    /// The media probe could not determine duration/framerate for a source.
    #[error("media probe failed: {0}")]
    ProbeFailed(String),

    /// `claim_next` raced another claimer and lost; never surfaced to a client, the dispatcher
    /// absorbs it and reports "no job available" instead.
    #[error("claim lost")]
    ClaimLost,

    /// The storage engine failed; the enclosing transaction has rolled back.
    #[error("repository error: {0}")]
    Repository(String),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub(crate) fn is_claim_lost(&self) -> bool {
        matches!(self, Error::ClaimLost)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.to_string())
    }
}

/// At the HTTP boundary every variant maps to one status code, mirroring the `AppError` pattern
/// the rest of this codebase's HTTP surface already uses. `ClaimLost` never reaches here -- the
/// dispatcher absorbs it before it could be returned from a handler.
#[cfg(feature = "http")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::SourceNotFound(_) => StatusCode::NOT_FOUND,
            Error::DestinationInvalid(_) => StatusCode::BAD_REQUEST,
            Error::ProbeFailed(_) => StatusCode::BAD_GATEWAY,
            Error::ClaimLost => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, axum::Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_lost_is_recognized() {
        assert!(Error::ClaimLost.is_claim_lost());
        assert!(!Error::bad_request("x").is_claim_lost());
    }
}
