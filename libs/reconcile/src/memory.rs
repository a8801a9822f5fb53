//! In-memory lease table.
//!
//! Gives pipelines the same claim/extend/write-back semantics as the SQL
//! store, with a mutex standing in for the row locks. Used by tests and
//! single-process development setups.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{ClaimRequest, Leasable, LeaseState, LeaseStore, Leased, LockToken, ReconcileResult};

/// A row type that can live in a [`MemoryLeaseTable`].
pub trait MemoryRecord: Leasable {
    fn lease_mut(&mut self) -> &mut LeaseState;

    fn set_last_processed_at(&mut self, at: DateTime<Utc>);

    fn is_deleted(&self) -> bool;

    /// Applies the column changes of one processing pass.
    fn apply(&mut self, update: &Self::Update);
}

/// Rows of one resource type, keyed by [`Leasable::key`].
pub struct MemoryLeaseTable<T> {
    rows: Mutex<BTreeMap<String, T>>,
}

impl<T: MemoryRecord> Default for MemoryLeaseTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MemoryRecord> MemoryLeaseTable<T> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<String, T>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, row: T) {
        self.rows().insert(row.key(), row);
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.rows().get(key).cloned()
    }

    pub fn all(&self) -> Vec<T> {
        self.rows().values().cloned().collect()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows().values().filter(|&r| predicate(r)).cloned().collect()
    }

    /// Mutates one row in place. Returns what `f` returned, or `None` if the
    /// row does not exist.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.rows().get_mut(key).map(f)
    }

    /// A lease store over this table that only claims rows matching `filter`.
    pub fn lease_store(
        self: &Arc<Self>,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> MemoryLeaseStore<T> {
        MemoryLeaseStore {
            table: self.clone(),
            filter: Arc::new(filter),
        }
    }
}

type RowFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

pub struct MemoryLeaseStore<T> {
    table: Arc<MemoryLeaseTable<T>>,
    filter: RowFilter<T>,
}

impl<T> Clone for MemoryLeaseStore<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            filter: self.filter.clone(),
        }
    }
}

#[async_trait]
impl<T: MemoryRecord> LeaseStore<T> for MemoryLeaseStore<T> {
    async fn claim(&self, request: &ClaimRequest) -> ReconcileResult<Vec<Leased<T>>> {
        let mut rows = self.table.rows();
        let due_before = request.due_before();
        let mut due: Vec<&mut T> = rows
            .values_mut()
            .filter(|row| {
                !row.is_deleted()
                    && row.last_processed_at() <= due_before
                    && row.lease().is_claimable_by(&request.owner, request.now)
                    && (self.filter)(&**row)
            })
            .collect();
        due.sort_by_key(|row| row.last_processed_at());

        let expires_at = request.lease_expires_at();
        let claimed = due
            .into_iter()
            .take(request.limit)
            .map(|row| {
                let token = LockToken::generate();
                *row.lease_mut() = LeaseState {
                    lock_token: Some(token),
                    lock_expires_at: Some(expires_at),
                    lock_owner: Some(request.owner.clone()),
                };
                Leased {
                    item: row.clone(),
                    token,
                    expires_at,
                }
            })
            .collect();
        Ok(claimed)
    }

    async fn extend(
        &self,
        key: &str,
        token: LockToken,
        expires_at: DateTime<Utc>,
    ) -> ReconcileResult<bool> {
        Ok(self
            .table
            .update(key, |row| {
                if row.lease().lock_token != Some(token) {
                    return false;
                }
                row.lease_mut().lock_expires_at = Some(expires_at);
                true
            })
            .unwrap_or(false))
    }

    async fn write_back(
        &self,
        key: &str,
        token: LockToken,
        update: &T::Update,
        processed_at: DateTime<Utc>,
    ) -> ReconcileResult<bool> {
        Ok(self
            .table
            .update(key, |row| {
                if row.lease().lock_token != Some(token) {
                    return false;
                }
                row.apply(update);
                row.lease_mut().clear();
                row.set_last_processed_at(processed_at);
                true
            })
            .unwrap_or(false))
    }
}
