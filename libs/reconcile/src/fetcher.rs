//! Claims due rows for a pipeline.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::{to_delta, ClaimRequest, Clock, Leasable, LeaseStore, Leased, ReconcileResult};

/// Claims batches of due rows on behalf of one pipeline.
pub struct Fetcher<T: Leasable> {
    store: Arc<dyn LeaseStore<T>>,
    clock: Arc<dyn Clock>,
    owner: String,
    lease_timeout: Duration,
    min_processing_interval: Duration,
}

impl<T: Leasable> Fetcher<T> {
    pub fn new(
        store: Arc<dyn LeaseStore<T>>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        lease_timeout: Duration,
        min_processing_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            owner: owner.into(),
            lease_timeout,
            min_processing_interval,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claims up to `limit` rows. An empty result means nothing is due.
    pub async fn fetch(&self, limit: usize) -> ReconcileResult<Vec<Leased<T>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let request = ClaimRequest {
            owner: self.owner.clone(),
            limit,
            now: self.clock.now(),
            lease_timeout: to_delta(self.lease_timeout),
            min_processing_interval: to_delta(self.min_processing_interval),
        };
        let items = self.store.claim(&request).await?;
        debug!(
            pipeline = %self.owner,
            requested = limit,
            claimed = items.len(),
            "Fetched batch"
        );
        Ok(items)
    }
}
