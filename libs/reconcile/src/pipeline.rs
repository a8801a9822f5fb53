//! Fetcher + heartbeater + workers around one bounded queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

use crate::{Clock, Fetcher, Heartbeater, Leasable, LeaseStore, Processor, SystemClock, Worker};

/// Tuning knobs of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Pipeline name, also written to `lock_owner`.
    pub name: String,

    /// Number of concurrent workers.
    pub workers: usize,

    /// Queue is refilled once it drops below `capacity * lower` items.
    pub queue_lower_limit_factor: f64,

    /// Queue capacity is `workers * upper` items.
    pub queue_upper_limit_factor: f64,

    /// A row is not fetched again until this long after its last processing.
    pub min_processing_interval: Duration,

    /// Lease length granted on claim and on every heartbeat.
    pub lease_timeout: Duration,

    /// Leases with less than this remaining are extended.
    pub heartbeat_trigger: Duration,

    /// How often the heartbeater wakes up.
    pub heartbeat_interval: Duration,

    /// Minimum delay between fetches when the queue is full or nothing is due.
    pub queue_check_delay: Duration,

    /// Upper bound of the idle backoff after repeated empty fetches.
    pub max_idle_backoff: Duration,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: 10,
            queue_lower_limit_factor: 0.5,
            queue_upper_limit_factor: 2.0,
            min_processing_interval: Duration::from_secs(5),
            lease_timeout: Duration::from_secs(30),
            heartbeat_trigger: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
            queue_check_delay: Duration::from_secs(1),
            max_idle_backoff: Duration::from_secs(10),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_min_processing_interval(mut self, interval: Duration) -> Self {
        self.min_processing_interval = interval;
        self
    }

    /// Maximum number of fetched items waiting for a worker.
    pub fn queue_capacity(&self) -> usize {
        ((self.workers.max(1) as f64) * self.queue_upper_limit_factor)
            .ceil()
            .max(1.0) as usize
    }

    /// Queue length below which the fetcher claims more rows.
    pub fn queue_refill_threshold(&self) -> usize {
        let capacity = self.queue_capacity();
        ((capacity as f64) * self.queue_lower_limit_factor)
            .ceil()
            .clamp(1.0, capacity as f64) as usize
    }
}

/// Reconciliation pipeline for one resource type.
pub struct Pipeline<T: Leasable> {
    config: PipelineConfig,
    store: Arc<dyn LeaseStore<T>>,
    processor: Arc<dyn Processor<T>>,
    clock: Arc<dyn Clock>,
    heartbeater: Arc<Heartbeater<T>>,
}

impl<T: Leasable> Pipeline<T> {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn LeaseStore<T>>,
        processor: Arc<dyn Processor<T>>,
    ) -> Self {
        Self::with_clock(config, store, processor, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: PipelineConfig,
        store: Arc<dyn LeaseStore<T>>,
        processor: Arc<dyn Processor<T>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let heartbeater = Arc::new(Heartbeater::new(
            config.name.clone(),
            store.clone(),
            clock.clone(),
            config.lease_timeout,
            config.heartbeat_trigger,
            config.heartbeat_interval,
        ));
        Self {
            config,
            store,
            processor,
            clock,
            heartbeater,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn heartbeater(&self) -> Arc<Heartbeater<T>> {
        self.heartbeater.clone()
    }

    pub fn fetcher(&self) -> Fetcher<T> {
        Fetcher::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.name.clone(),
            self.config.lease_timeout,
            self.config.min_processing_interval,
        )
    }

    pub fn worker(&self, id: usize) -> Worker<T> {
        Worker::new(
            id,
            self.config.name.clone(),
            self.store.clone(),
            self.processor.clone(),
            self.heartbeater.clone(),
            self.clock.clone(),
        )
    }

    /// Runs the pipeline until shutdown is signaled.
    #[instrument(skip_all, fields(pipeline = %self.config.name))]
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let capacity = self.config.queue_capacity();
        info!(
            workers = self.config.workers,
            queue_capacity = capacity,
            refill_threshold = self.config.queue_refill_threshold(),
            "Starting pipeline"
        );

        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.config.workers + 1);
        handles.push(tokio::spawn({
            let heartbeater = self.heartbeater.clone();
            let shutdown = shutdown.clone();
            async move { heartbeater.run(shutdown).await }
        }));
        for id in 0..self.config.workers {
            let worker = self.worker(id);
            handles.push(tokio::spawn(worker.run(rx.clone(), shutdown.clone())));
        }

        self.fill_queue(tx, shutdown).await;

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Pipeline task panicked");
            }
        }
        info!("Pipeline stopped");
    }

    /// Keeps the queue between the refill threshold and its capacity.
    async fn fill_queue(
        &self,
        tx: mpsc::Sender<crate::Leased<T>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let fetcher = self.fetcher();
        let threshold = self.config.queue_refill_threshold();
        let mut backoff = self.config.queue_check_delay;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let queued = tx.max_capacity() - tx.capacity();
            if queued >= threshold {
                if wait_or_shutdown(&mut shutdown, self.config.queue_check_delay).await {
                    break;
                }
                continue;
            }

            match fetcher.fetch(tx.max_capacity() - queued).await {
                Ok(items) if items.is_empty() => {
                    debug!(backoff_ms = backoff.as_millis() as u64, "Nothing due");
                    if wait_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    backoff = (backoff * 2).min(self.config.max_idle_backoff);
                }
                Ok(items) => {
                    backoff = self.config.queue_check_delay;
                    for item in items {
                        self.heartbeater.track(&item);
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Fetch failed");
                    if wait_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                }
            }
        }
    }
}

/// Sleeps for `delay`; returns true if shutdown was signaled meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(10, 20, 10)]
    #[case(5, 10, 5)]
    #[case(1, 2, 1)]
    #[case(0, 2, 1)]
    fn test_queue_watermarks(
        #[case] workers: usize,
        #[case] capacity: usize,
        #[case] threshold: usize,
    ) {
        let config = PipelineConfig::new("jobs").with_workers(workers);
        assert_eq!(config.queue_capacity(), capacity);
        assert_eq!(config.queue_refill_threshold(), threshold);
    }

    #[test]
    fn test_defaults_keep_heartbeat_inside_lease() {
        let config = PipelineConfig::new("fleets");
        assert!(config.heartbeat_trigger < config.lease_timeout);
        assert!(config.heartbeat_interval < config.heartbeat_trigger);
    }
}
