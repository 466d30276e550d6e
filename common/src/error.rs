//! Error types for ledger operations.

use thiserror::Error;

use crate::AccountId;

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// The caller passed an argument the ledger refuses to act on.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Transactional or IO failure in the underlying store.
    #[error("Store failure: {message}")]
    StoreFailure { message: String, retryable: bool },
}

impl LedgerError {
    /// Missing account row.
    pub fn account_not_found(id: AccountId) -> Self {
        LedgerError::NotFound {
            entity: "account",
            id: id.get(),
        }
    }

    /// Invalid argument attributed to a request field.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::InvalidArgument {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Store failure a caller should not retry.
    pub fn store_failure(message: impl Into<String>) -> Self {
        LedgerError::StoreFailure {
            message: message.into(),
            retryable: false,
        }
    }

    /// Store failure caused by contention (lock wait timeout, detected
    /// deadlock, serialization failure).
    pub fn retryable_store_failure(message: impl Into<String>) -> Self {
        LedgerError::StoreFailure {
            message: message.into(),
            retryable: true,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StoreFailure { retryable: true, .. })
    }

    /// Check if this error reports a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }

    /// Get a stable error code for callers mapping errors to responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound { .. } => "NOT_FOUND",
            LedgerError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            LedgerError::StoreFailure { .. } => "STORE_FAILURE",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
