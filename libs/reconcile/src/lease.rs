//! Lease fields and leased items.

use chrono::{DateTime, Utc};

/// Opaque token regenerated on every successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(uuid::Uuid);

impl LockToken {
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lease columns carried by every reconcilable row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseState {
    pub lock_token: Option<LockToken>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
}

impl LeaseState {
    /// Whether someone holds an unexpired lease at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.lock_expires_at.is_some_and(|at| at >= now)
    }

    /// Whether `owner` may claim this row at `now`.
    ///
    /// Rows never leased or explicitly released are free; an expired lease
    /// can only be re-claimed by the pipeline that held it.
    pub fn is_claimable_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        !self.is_live(now) && self.lock_owner.as_deref().is_none_or(|o| o == owner)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A persisted resource that pipelines can lease and reconcile.
pub trait Leasable: Clone + Send + Sync + 'static {
    /// Column changes produced by one processing pass.
    ///
    /// `Default` must mean "no change": writing it back only releases the
    /// lease and stamps `last_processed_at`.
    type Update: Default + std::fmt::Debug + Send + Sync + 'static;

    /// Primary key as stored.
    fn key(&self) -> String;

    fn lease(&self) -> &LeaseState;

    fn last_processed_at(&self) -> DateTime<Utc>;
}

/// An item claimed by a fetcher, together with the token of its lease.
#[derive(Debug, Clone)]
pub struct Leased<T> {
    pub item: T,
    pub token: LockToken,
    pub expires_at: DateTime<Utc>,
}

impl<T: Leasable> Leased<T> {
    pub fn key(&self) -> String {
        self.item.key()
    }
}
