//! Pipeline framework errors.

use thiserror::Error;

/// Boxed error returned by processors and store backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pipeline operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The underlying store failed.
    #[error("store error: {0}")]
    Store(#[source] BoxError),

    /// A stored row could not be decoded into a resource.
    #[error("invalid row {key}: {message}")]
    InvalidRow { key: String, message: String },
}

impl ReconcileError {
    pub fn store(err: impl Into<BoxError>) -> Self {
        Self::Store(err.into())
    }
}
