//! Errors raised by backend compute operations.

use thiserror::Error;

/// Failure of a cloud-side operation.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Transient provider-side failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The provider has no capacity for the requested offer.
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// The placement group still has members and cannot be deleted yet.
    #[error("placement group {0} is in use")]
    PlacementGroupInUse(String),

    /// The backend does not implement this operation.
    #[error("operation not supported by backend: {0}")]
    NotSupported(&'static str),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ComputeError {
    /// Recoverable provider errors: log and try another offer or cycle.
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::NoCapacity(_))
    }
}
