//! Lease semantics of the pipeline framework, exercised against the
//! in-memory lease table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use stratus_reconcile::{
    BoxError, ClaimRequest, Clock, Heartbeater, ItemOutcome, LeaseState, LeaseStore, Leasable,
    Leased, LockToken, ManualClock, MemoryLeaseStore, MemoryLeaseTable, MemoryRecord, Pipeline,
    PipelineConfig, Processor,
};
use tokio::sync::watch;

#[derive(Debug, Clone)]
struct Counter {
    id: String,
    value: u32,
    target: u32,
    deleted: bool,
    lease: LeaseState,
    last_processed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CounterUpdate {
    value: Option<u32>,
}

impl Counter {
    fn new(id: &str, target: u32, last_processed_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            value: 0,
            target,
            deleted: false,
            lease: LeaseState::default(),
            last_processed_at,
        }
    }
}

impl Leasable for Counter {
    type Update = CounterUpdate;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn lease(&self) -> &LeaseState {
        &self.lease
    }

    fn last_processed_at(&self) -> DateTime<Utc> {
        self.last_processed_at
    }
}

impl MemoryRecord for Counter {
    fn lease_mut(&mut self) -> &mut LeaseState {
        &mut self.lease
    }

    fn set_last_processed_at(&mut self, at: DateTime<Utc>) {
        self.last_processed_at = at;
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn apply(&mut self, update: &CounterUpdate) {
        if let Some(value) = update.value {
            self.value = value;
        }
    }
}

struct Increment {
    calls: AtomicUsize,
}

#[async_trait]
impl Processor<Counter> for Increment {
    async fn process(&self, item: &Leased<Counter>) -> Result<CounterUpdate, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CounterUpdate {
            value: Some(item.item.value + 1),
        })
    }
}

struct AlwaysFails;

#[async_trait]
impl Processor<Counter> for AlwaysFails {
    async fn process(&self, _item: &Leased<Counter>) -> Result<CounterUpdate, BoxError> {
        Err("cloud API exploded".into())
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn claim(owner: &str, now: DateTime<Utc>, limit: usize) -> ClaimRequest {
    ClaimRequest {
        owner: owner.to_string(),
        limit,
        now,
        lease_timeout: TimeDelta::seconds(30),
        min_processing_interval: TimeDelta::seconds(5),
    }
}

fn unfinished(table: &Arc<MemoryLeaseTable<Counter>>) -> MemoryLeaseStore<Counter> {
    table.lease_store(|c: &Counter| c.value < c.target)
}

#[tokio::test]
async fn test_claim_orders_oldest_first_and_respects_interval() {
    let now = epoch();
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("b", 1, now - TimeDelta::seconds(20)));
    table.insert(Counter::new("a", 1, now - TimeDelta::seconds(10)));
    table.insert(Counter::new("c", 1, now - TimeDelta::seconds(30)));
    table.insert(Counter::new("recent", 1, now - TimeDelta::seconds(1)));
    let store = unfinished(&table);

    let claimed = store.claim(&claim("counters", now, 2)).await.unwrap();
    let keys: Vec<_> = claimed.iter().map(|l| l.key()).collect();
    assert_eq!(keys, vec!["c", "b"]);

    let row = table.get("c").unwrap();
    assert_eq!(row.lease.lock_owner.as_deref(), Some("counters"));
    assert_eq!(row.lease.lock_token, Some(claimed[0].token));
    assert_eq!(row.lease.lock_expires_at, Some(now + TimeDelta::seconds(30)));

    let rest = store.claim(&claim("counters", now, 10)).await.unwrap();
    let keys: Vec<_> = rest.iter().map(|l| l.key()).collect();
    assert_eq!(keys, vec!["a"], "recently processed row is not due yet");
}

#[tokio::test]
async fn test_deleted_and_foreign_owned_rows_are_skipped() {
    let now = epoch();
    let table = Arc::new(MemoryLeaseTable::new());
    let mut deleted = Counter::new("deleted", 1, now - TimeDelta::minutes(5));
    deleted.deleted = true;
    table.insert(deleted);
    let mut foreign = Counter::new("foreign", 1, now - TimeDelta::minutes(5));
    foreign.lease = LeaseState {
        lock_token: Some(LockToken::generate()),
        lock_expires_at: Some(now - TimeDelta::seconds(1)),
        lock_owner: Some("other-pipeline".to_string()),
    };
    table.insert(foreign);

    let claimed = unfinished(&table)
        .claim(&claim("counters", now, 10))
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn test_racing_fetchers_on_expired_lease_have_one_winner() {
    let now = epoch();
    let table = Arc::new(MemoryLeaseTable::new());
    let mut row = Counter::new("job", 1, now - TimeDelta::minutes(1));
    row.lease = LeaseState {
        lock_token: Some(LockToken::generate()),
        lock_expires_at: Some(now - TimeDelta::seconds(1)),
        lock_owner: Some("counters".to_string()),
    };
    table.insert(row);

    let first = unfinished(&table);
    let second = unfinished(&table);
    let request = claim("counters", now, 1);
    let (a, b) = tokio::join!(first.claim(&request), second.claim(&request));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.len() + b.len(), 1, "exactly one fetcher claims the row");

    let winner = a.into_iter().chain(b).next().unwrap();
    let stale = LockToken::generate();
    let update = CounterUpdate { value: Some(1) };
    assert!(!first.write_back("job", stale, &update, now).await.unwrap());
    assert!(first
        .write_back("job", winner.token, &update, now)
        .await
        .unwrap());
    assert!(
        !second
            .write_back("job", winner.token, &update, now)
            .await
            .unwrap(),
        "a released lease cannot be written twice"
    );
    assert_eq!(table.get("job").unwrap().value, 1);
    assert_eq!(table.get("job").unwrap().lease, LeaseState::default());
}

#[tokio::test]
async fn test_overrun_worker_write_back_is_voided() {
    let now = epoch();
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("slow", 5, now - TimeDelta::minutes(1)));
    let store = unfinished(&table);

    let first = store.claim(&claim("counters", now, 1)).await.unwrap();
    let later = now + TimeDelta::seconds(31);
    let second = store.claim(&claim("counters", later, 1)).await.unwrap();
    assert_eq!(second.len(), 1, "expired lease is claimable again");

    let update = CounterUpdate { value: Some(4) };
    assert!(!store
        .write_back("slow", first[0].token, &update, later)
        .await
        .unwrap());
    assert_eq!(table.get("slow").unwrap().value, 0);
}

#[tokio::test]
async fn test_heartbeat_extends_and_detects_lost_leases() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("kept", 1, epoch() - TimeDelta::minutes(1)));
    table.insert(Counter::new("stolen", 1, epoch() - TimeDelta::minutes(1)));
    let store: Arc<dyn LeaseStore<Counter>> = Arc::new(unfinished(&table));

    let heartbeater = Heartbeater::new(
        "counters",
        store.clone(),
        clock.clone(),
        Duration::from_secs(30),
        Duration::from_secs(15),
        Duration::from_secs(5),
    );
    let claimed = store.claim(&claim("counters", clock.now(), 10)).await.unwrap();
    for item in &claimed {
        heartbeater.track(item);
    }

    assert_eq!(heartbeater.heartbeat_once().await, 0, "plenty of lease left");

    table.update("stolen", |row| {
        row.lease.lock_token = Some(LockToken::generate());
    });
    clock.advance(TimeDelta::seconds(20));
    assert_eq!(heartbeater.heartbeat_once().await, 1);
    let token_of = |key: &str| claimed.iter().find(|i| i.key() == key).unwrap().token;
    assert!(heartbeater.is_lost("stolen", token_of("stolen")));
    assert!(!heartbeater.is_lost("kept", token_of("kept")));
    assert_eq!(
        table.get("kept").unwrap().lease.lock_expires_at,
        Some(clock.now() + TimeDelta::seconds(30))
    );
}

#[tokio::test]
async fn test_stale_claim_does_not_untrack_newer_claim() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("x", 1, epoch() - TimeDelta::minutes(1)));
    let store: Arc<dyn LeaseStore<Counter>> = Arc::new(unfinished(&table));
    let heartbeater = Heartbeater::new(
        "counters",
        store.clone(),
        clock.clone(),
        Duration::from_secs(30),
        Duration::from_secs(15),
        Duration::from_secs(5),
    );

    let first = store
        .claim(&claim("counters", clock.now(), 1))
        .await
        .unwrap()
        .remove(0);
    heartbeater.track(&first);

    // The first lease runs out and the row is claimed again.
    clock.advance(TimeDelta::seconds(31));
    let second = store
        .claim(&claim("counters", clock.now(), 1))
        .await
        .unwrap()
        .remove(0);
    assert_ne!(first.token, second.token);
    heartbeater.track(&second);

    heartbeater.untrack("x", first.token);
    assert_eq!(heartbeater.tracked_count(), 1);

    clock.advance(TimeDelta::seconds(20));
    assert_eq!(heartbeater.heartbeat_once().await, 1);
    assert!(!heartbeater.is_lost("x", second.token));

    heartbeater.untrack("x", second.token);
    assert_eq!(heartbeater.tracked_count(), 0);
}

#[tokio::test]
async fn test_worker_discards_update_of_lost_item() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("x", 3, epoch() - TimeDelta::minutes(1)));
    let store: Arc<dyn LeaseStore<Counter>> = Arc::new(unfinished(&table));
    let pipeline = Pipeline::with_clock(
        PipelineConfig::new("counters"),
        store.clone(),
        Arc::new(Increment {
            calls: AtomicUsize::new(0),
        }),
        clock.clone(),
    );

    let item = pipeline.fetcher().fetch(1).await.unwrap().remove(0);
    let heartbeater = pipeline.heartbeater();
    heartbeater.track(&item);
    table.update("x", |row| row.lease.lock_token = Some(LockToken::generate()));
    clock.advance(TimeDelta::seconds(20));
    heartbeater.heartbeat_once().await;

    let outcome = pipeline.worker(0).handle(item).await;
    assert_eq!(outcome, ItemOutcome::LeaseLost);
    assert_eq!(table.get("x").unwrap().value, 0);
    assert_eq!(heartbeater.tracked_count(), 0);
}

#[tokio::test]
async fn test_processor_error_releases_item_without_changes() {
    let clock = Arc::new(ManualClock::new(epoch()));
    let table = Arc::new(MemoryLeaseTable::new());
    table.insert(Counter::new("x", 3, epoch() - TimeDelta::minutes(1)));
    let store: Arc<dyn LeaseStore<Counter>> = Arc::new(unfinished(&table));
    let pipeline = Pipeline::with_clock(
        PipelineConfig::new("counters"),
        store,
        Arc::new(AlwaysFails),
        clock.clone(),
    );

    let item = pipeline.fetcher().fetch(1).await.unwrap().remove(0);
    assert_eq!(pipeline.worker(0).handle(item).await, ItemOutcome::Applied);

    let row = table.get("x").unwrap();
    assert_eq!(row.value, 0);
    assert_eq!(row.lease, LeaseState::default());
    assert_eq!(row.last_processed_at, clock.now());
}

#[tokio::test]
async fn test_pipeline_drives_rows_to_completion() {
    let table = Arc::new(MemoryLeaseTable::new());
    let start = Utc::now() - TimeDelta::minutes(1);
    for i in 0..5 {
        table.insert(Counter::new(&format!("c{i}"), 3, start));
    }
    let processor = Arc::new(Increment {
        calls: AtomicUsize::new(0),
    });
    let mut config = PipelineConfig::new("counters")
        .with_workers(2)
        .with_min_processing_interval(Duration::ZERO);
    config.queue_check_delay = Duration::from_millis(5);
    config.max_idle_backoff = Duration::from_millis(20);

    let pipeline = Pipeline::new(config, Arc::new(unfinished(&table)), processor.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while table.all().iter().any(|c| c.value < c.target) {
        assert!(tokio::time::Instant::now() < deadline, "pipeline stalled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline did not shut down")
        .unwrap();

    assert!(table.all().iter().all(|c| c.value == 3));
    assert_eq!(processor.calls.load(Ordering::SeqCst), 15);
}
