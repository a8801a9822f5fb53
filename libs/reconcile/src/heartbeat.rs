//! Lease extension for in-flight items.
//!
//! Leases are kept short so a crashed worker's rows become claimable
//! quickly. Items that are still queued or being processed get their lease
//! pushed forward whenever the remaining time drops below the trigger, so
//! slow processing (cloud API calls) does not lose its lease.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{to_delta, Clock, Leasable, LeaseStore, Leased, LockToken};

#[derive(Debug, Clone)]
struct Tracked {
    token: LockToken,
    expires_at: DateTime<Utc>,
    lost: bool,
}

pub struct Heartbeater<T: Leasable> {
    name: String,
    store: Arc<dyn LeaseStore<T>>,
    clock: Arc<dyn Clock>,
    lease_timeout: Duration,
    trigger: Duration,
    interval: Duration,
    tracked: Mutex<HashMap<String, Tracked>>,
}

impl<T: Leasable> Heartbeater<T> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn LeaseStore<T>>,
        clock: Arc<dyn Clock>,
        lease_timeout: Duration,
        trigger: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            clock,
            lease_timeout,
            trigger,
            interval,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Tracked>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts extending the lease of `item`.
    pub fn track(&self, item: &Leased<T>) {
        self.entries().insert(
            item.key(),
            Tracked {
                token: item.token,
                expires_at: item.expires_at,
                lost: false,
            },
        );
    }

    /// Stops extending the lease `token` holds on `key`. An entry tracked
    /// under a newer token is left alone.
    pub fn untrack(&self, key: &str, token: LockToken) {
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|t| t.token == token) {
            entries.remove(key);
        }
    }

    /// Whether the lease `token` held on `key` was found taken over.
    pub fn is_lost(&self, key: &str, token: LockToken) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|t| t.token == token && t.lost)
    }

    pub fn tracked_count(&self) -> usize {
        self.entries().len()
    }

    /// Extends every lease that is close to expiring. Returns how many were
    /// extended.
    pub async fn heartbeat_once(&self) -> usize {
        let now = self.clock.now();
        let trigger = to_delta(self.trigger);
        let due: Vec<(String, LockToken)> = self
            .entries()
            .iter()
            .filter(|(_, t)| !t.lost && t.expires_at - now < trigger)
            .map(|(key, t)| (key.clone(), t.token))
            .collect();

        let expires_at = now + to_delta(self.lease_timeout);
        let mut extended = 0;
        for (key, token) in due {
            match self.store.extend(&key, token, expires_at).await {
                Ok(true) => {
                    if let Some(entry) = self.entries().get_mut(&key) {
                        if entry.token == token {
                            entry.expires_at = expires_at;
                        }
                    }
                    extended += 1;
                }
                Ok(false) => {
                    warn!(
                        pipeline = %self.name,
                        key = %key,
                        "Lease lost, result of in-flight processing will be discarded"
                    );
                    if let Some(entry) = self.entries().get_mut(&key) {
                        if entry.token == token {
                            entry.lost = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(pipeline = %self.name, key = %key, error = %e, "Failed to extend lease");
                }
            }
        }
        if extended > 0 {
            debug!(pipeline = %self.name, extended, "Heartbeat extended leases");
        }
        extended
    }

    /// Runs the heartbeat loop until shutdown is signaled.
    #[instrument(skip(self, shutdown), fields(pipeline = %self.name))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.heartbeat_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Heartbeater shutting down");
                        break;
                    }
                }
            }
        }
    }
}
