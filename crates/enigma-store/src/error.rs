//! Error types for the enigma-store crate.
//!
//! All table operations return [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the table cache or its remote backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested table, row, column or record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Loading tables from the remote failed. The previous cache is intact.
    #[error("remote read failed: {message}")]
    RemoteRead { message: String },

    /// The cache was mutated but the remote did not acknowledge the write.
    ///
    /// The table is marked dirty and the write is queued for
    /// [`TableStore::retry_pending`](crate::TableStore::retry_pending).
    #[error("remote write to `{table}` failed (table is dirty): {message}")]
    RemoteWrite { table: String, message: String },

    /// A remote call did not complete within its time limit.
    #[error("remote {operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },

    /// The remote backend rejected or failed a call.
    #[error("remote error: {0}")]
    Remote(String),

    /// HTTP transport failure talking to the remote.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteWrite { .. }
                | Self::RemoteRead { .. }
                | Self::Timeout { .. }
                | Self::Http(_)
                | Self::Remote(_)
        )
    }

    /// Whether the error left a table with unacknowledged local writes.
    pub fn is_dirty(&self) -> bool {
        matches!(self, Self::RemoteWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = StoreError::not_found("table", "users");
        assert_eq!(err.to_string(), "table not found: users");
        assert!(!err.is_retryable());
    }

    #[test]
    fn remote_write_is_dirty_and_retryable() {
        let err = StoreError::RemoteWrite {
            table: "users".into(),
            message: "boom".into(),
        };
        assert!(err.is_dirty());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("dirty"));
    }
}
