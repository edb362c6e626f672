use thiserror::Error;

/// Failures of the like-notification pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// The backing store could not be reached, rejected the query, or did not
    /// answer within the fetch timeout.
    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    /// The read watermark could not be written durably.
    #[error("Failed to persist read watermark: {0}")]
    PersistenceFailure(String),

    /// A returned row lacked a field required to build a like event.
    #[error("Malformed like row {row_id}: {reason}")]
    MalformedRow { row_id: String, reason: String },

    /// The viewer's coordinator was torn down.
    #[error("Notification coordinator has been disposed")]
    Disposed,
}

impl NotificationError {
    pub fn source_unavailable(err: impl std::fmt::Display) -> Self {
        NotificationError::SourceUnavailable(err.to_string())
    }

    pub fn persistence_failure(err: impl std::fmt::Display) -> Self {
        NotificationError::PersistenceFailure(err.to_string())
    }
}
