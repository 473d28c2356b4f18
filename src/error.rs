//! Typed errors surfaced identically in both execution modes.
//!
//! Every operation returns one of these kinds whether it ran against the
//! local store or went through the coordinator. The coordinator serializes
//! the kind into its error responses and the client reconstructs it, so a
//! caller cannot tell the modes apart by error behavior.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Task, session, or template id unknown.
    #[error("{0}")]
    NotFound(String),

    /// Malformed input: unknown status, empty title, priority out of range.
    #[error("{0}")]
    InvalidArgument(String),

    /// An invariant would be violated: dependency cycle, delete with
    /// children and no force, completing a task owned by another session.
    #[error("{0}")]
    Conflict(String),

    /// The store's advisory lock could not be acquired within the timeout.
    #[error("{0}")]
    LockTimeout(String),

    /// The coordinator could not be reached after retry exhaustion.
    #[error("{0}")]
    Unavailable(String),

    /// The operation references a session whose heartbeat has expired.
    #[error("{0}")]
    Stale(String),

    /// Unexpected I/O or serialization failure.
    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    /// Stable kind string, used on the wire and in bulk-failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidArgument(_) => "invalid_argument",
            CoreError::Conflict(_) => "conflict",
            CoreError::LockTimeout(_) => "lock_timeout",
            CoreError::Unavailable(_) => "unavailable",
            CoreError::Stale(_) => "stale",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Rebuild an error from its wire representation.
    pub fn from_kind(kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            "not_found" => CoreError::NotFound(message),
            "invalid_argument" => CoreError::InvalidArgument(message),
            "conflict" => CoreError::Conflict(message),
            "lock_timeout" => CoreError::LockTimeout(message),
            "unavailable" => CoreError::Unavailable(message),
            "stale" => CoreError::Stale(message),
            _ => CoreError::Internal(message),
        }
    }

    /// HTTP status the coordinator answers with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::NotFound(_) => 404,
            CoreError::InvalidArgument(_) => 400,
            CoreError::Conflict(_) | CoreError::Stale(_) => 409,
            CoreError::LockTimeout(_) | CoreError::Unavailable(_) => 503,
            CoreError::Internal(_) => 500,
        }
    }

    /// Whether the client retry loop may try again. Only transport-level
    /// failures qualify; HTTP-level errors (including 503) surface as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Internal(format!("i/o error: {e}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        let errs = [
            CoreError::NotFound("x".into()),
            CoreError::InvalidArgument("x".into()),
            CoreError::Conflict("x".into()),
            CoreError::LockTimeout("x".into()),
            CoreError::Unavailable("x".into()),
            CoreError::Stale("x".into()),
            CoreError::Internal("x".into()),
        ];
        for e in errs {
            let back = CoreError::from_kind(e.kind(), e.to_string());
            assert_eq!(back.kind(), e.kind());
        }
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(CoreError::Unavailable("x".into()).is_transient());
        assert!(!CoreError::LockTimeout("x".into()).is_transient());
        assert!(!CoreError::Conflict("x".into()).is_transient());
    }
}
