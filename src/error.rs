use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Typed failures surfaced to callers of the ledger core.
///
/// A failed operation never leaves a partial mutation behind: validation
/// happens before any write, and writes travel through a single unit of
/// work that commits or rolls back as a whole.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("transfer limit exceeded: limit is {limit}")]
    LimitExceeded { limit: i64 },

    #[error("credential mismatch")]
    CredentialMismatch,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised below the ports boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}
