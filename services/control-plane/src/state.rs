//! Process-wide context shared by all pipelines.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use stratus_reconcile::{Clock, SystemClock};
use tokio::sync::{Mutex, MutexGuard};

use crate::backends::ProjectBackends;
use crate::store::Stores;

/// Shared server state.
///
/// Cheap to clone; every processor holds one.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ServerContextInner>,
}

struct ServerContextInner {
    stores: Stores,
    backends: Arc<dyn ProjectBackends>,
    clock: Arc<dyn Clock>,
    /// Serializes pool reuse inside this process.
    instance_pool: Mutex<()>,
}

impl ServerContext {
    pub fn new(stores: Stores, backends: Arc<dyn ProjectBackends>) -> Self {
        Self::with_clock(stores, backends, Arc::new(SystemClock))
    }

    pub fn with_clock(
        stores: Stores,
        backends: Arc<dyn ProjectBackends>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ServerContextInner {
                stores,
                backends,
                clock,
                instance_pool: Mutex::new(()),
            }),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn backends(&self) -> &dyn ProjectBackends {
        self.inner.backends.as_ref()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Locks the idle-instance pool of this process.
    ///
    /// Other processes are kept out by the conditional instance assignment,
    /// not by this lock.
    pub async fn lock_instance_pool(&self) -> MutexGuard<'_, ()> {
        self.inner.instance_pool.lock().await
    }
}
