//! Store contract consumed by pipelines.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::{Leasable, Leased, LockToken, ReconcileResult};

/// Parameters of one claim round.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    /// Pipeline name written to `lock_owner`.
    pub owner: String,
    pub limit: usize,
    pub now: DateTime<Utc>,
    pub lease_timeout: TimeDelta,
    /// Rows processed more recently than this are not due yet.
    pub min_processing_interval: TimeDelta,
}

impl ClaimRequest {
    pub fn lease_expires_at(&self) -> DateTime<Utc> {
        self.now + self.lease_timeout
    }

    /// Latest `last_processed_at` that is due at `now`.
    pub fn due_before(&self) -> DateTime<Utc> {
        self.now - self.min_processing_interval
    }
}

/// Transactional row store with non-blocking claims and conditional updates.
#[async_trait]
pub trait LeaseStore<T: Leasable>: Send + Sync {
    /// Claims up to `limit` due rows, oldest `last_processed_at` first.
    ///
    /// Rows locked by a concurrent claim are skipped, not waited on. Every
    /// returned row carries a fresh token that is already committed.
    async fn claim(&self, request: &ClaimRequest) -> ReconcileResult<Vec<Leased<T>>>;

    /// Pushes `lock_expires_at` forward if `token` still owns the row.
    ///
    /// Returns `false` when the lease was taken over.
    async fn extend(
        &self,
        key: &str,
        token: LockToken,
        expires_at: DateTime<Utc>,
    ) -> ReconcileResult<bool>;

    /// Applies `update`, clears the lease and stamps `last_processed_at`, if
    /// `token` still owns the row.
    ///
    /// Returns `false` when the row was reprocessed by someone else.
    async fn write_back(
        &self,
        key: &str,
        token: LockToken,
        update: &T::Update,
        processed_at: DateTime<Utc>,
    ) -> ReconcileResult<bool>;
}
