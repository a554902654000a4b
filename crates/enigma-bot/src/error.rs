//! Error types for the enigma-bot crate.

use enigma_store::StoreError;

/// Alias for `Result<T, BotError>`.
pub type BotResult<T> = Result<T, BotError>;

/// Errors raised while handling a conversation step.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// The table cache or its remote failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The user sent something the current step cannot accept.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A handler was invoked for a state it does not serve.
    ///
    /// Correct dispatch never produces this; seeing it means a bug.
    #[error("state mismatch: expected {expected}, found {found}")]
    StateMismatch { expected: &'static str, found: String },

    /// A table row does not have the shape the bot expects.
    #[error("malformed row {row} in `{table}`: {reason}")]
    Malformed {
        table: &'static str,
        row: usize,
        reason: String,
    },

    /// Delivering a reply failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BotError {
    pub(crate) fn malformed(table: &'static str, row: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            table,
            row,
            reason: reason.into(),
        }
    }
}
