//! Workers draining a pipeline queue.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::{BoxError, Clock, Heartbeater, Leasable, LeaseStore, Leased};

/// Resource-specific reconciliation step.
#[async_trait]
pub trait Processor<T: Leasable>: Send + Sync {
    /// Computes the column changes for one leased item.
    ///
    /// Returning `T::Update::default()` means "nothing to write, look again
    /// later". Returning an error has the same effect and is logged.
    async fn process(&self, item: &Leased<T>) -> Result<T::Update, BoxError>;
}

/// What happened to one item handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The update was written back.
    Applied,
    /// The lease was gone; nothing was written.
    LeaseLost,
    /// The write-back itself failed; the lease will expire on its own.
    WriteFailed,
}

pub struct Worker<T: Leasable> {
    id: usize,
    pipeline: String,
    store: Arc<dyn LeaseStore<T>>,
    processor: Arc<dyn Processor<T>>,
    heartbeater: Arc<Heartbeater<T>>,
    clock: Arc<dyn Clock>,
}

impl<T: Leasable> Worker<T> {
    pub fn new(
        id: usize,
        pipeline: impl Into<String>,
        store: Arc<dyn LeaseStore<T>>,
        processor: Arc<dyn Processor<T>>,
        heartbeater: Arc<Heartbeater<T>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id,
            pipeline: pipeline.into(),
            store,
            processor,
            heartbeater,
            clock,
        }
    }

    /// Drains `queue` until it closes or shutdown is signaled.
    pub async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<Leased<T>>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(pipeline = %self.pipeline, worker = self.id, "Worker started");
        loop {
            let next = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    item = rx.recv() => item,
                    _ = shutdown.changed() => None,
                }
            };
            let Some(item) = next else {
                break;
            };
            self.handle(item).await;
        }
        info!(pipeline = %self.pipeline, worker = self.id, "Worker stopped");
    }

    /// Processes one item and writes the result back under its lease.
    #[instrument(skip(self, item), fields(pipeline = %self.pipeline, key = %item.key()))]
    pub async fn handle(&self, item: Leased<T>) -> ItemOutcome {
        let key = item.key();
        let outcome = self.process_and_write(&key, &item).await;
        self.heartbeater.untrack(&key, item.token);
        outcome
    }

    async fn process_and_write(&self, key: &str, item: &Leased<T>) -> ItemOutcome {
        if self.heartbeater.is_lost(key, item.token) {
            debug!("Skipping item whose lease was lost while queued");
            return ItemOutcome::LeaseLost;
        }

        let update = match self.processor.process(item).await {
            Ok(update) => update,
            Err(e) => {
                error!(error = %e, "Processing failed, releasing item for a later attempt");
                T::Update::default()
            }
        };

        if self.heartbeater.is_lost(key, item.token) {
            warn!(?update, "Lease lost during processing, discarding update");
            return ItemOutcome::LeaseLost;
        }

        match self
            .store
            .write_back(key, item.token, &update, self.clock.now())
            .await
        {
            Ok(true) => ItemOutcome::Applied,
            Ok(false) => {
                warn!(?update, "Item was reprocessed by someone else, discarding update");
                ItemOutcome::LeaseLost
            }
            Err(e) => {
                error!(error = %e, "Failed to write back processed item");
                ItemOutcome::WriteFailed
            }
        }
    }
}
