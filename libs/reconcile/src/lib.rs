//! Resource reconciliation pipelines.
//!
//! A pipeline continuously drives one resource type toward its desired
//! state. Each pipeline is made of:
//!
//! - **Fetcher**: claims due rows from the store, stamping a fresh lease
//!   (`lock_token`, `lock_expires_at`, `lock_owner`) on each.
//! - **Heartbeater**: extends the lease of every fetched item that is still
//!   queued or being processed, and flags items whose lease was taken over.
//! - **Workers**: drain a bounded queue, run the resource-specific
//!   [`Processor`], and write the result back conditioned on the lock token.
//!
//! # Invariants
//!
//! - At most one live lease per row; a write-back whose token no longer
//!   matches affects zero rows and is dropped.
//! - A worker that overruns its lease is never interrupted; only its
//!   write-back is voided.
//! - Processor errors never escape a worker: the item is released with an
//!   empty update and picked up again on a later fetch.

mod clock;
mod error;
mod fetcher;
mod heartbeat;
mod lease;
pub mod memory;
mod pipeline;
mod retry;
mod store;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, ReconcileError, ReconcileResult};
pub use fetcher::Fetcher;
pub use heartbeat::Heartbeater;
pub use lease::{LeaseState, Leasable, Leased, LockToken};
pub use memory::{MemoryLeaseStore, MemoryLeaseTable, MemoryRecord};
pub use pipeline::{Pipeline, PipelineConfig};
pub use retry::{
    RetryOutcome, TerminationRetry, TERMINATION_RETRY_MAX_DURATION, TERMINATION_RETRY_TIMEOUT,
};
pub use store::{ClaimRequest, LeaseStore};
pub use worker::{ItemOutcome, Processor, Worker};

/// Converts a std duration into a chrono delta, saturating on overflow.
pub fn to_delta(duration: std::time::Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}
