//! Time bounded snapshot of a batch system queue, shared by every drone of one adapter.
//!
//! Listing the whole queue is expensive, so it is done at most once per `max_age` window no
//! matter how many drones ask. While a refresh is running, every other caller waits for that
//! same refresh instead of issuing its own command.
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::{Shared, WeakShared};
use serde::{Deserialize, Serialize};

use crate::Map;
use crate::common::error::CommandExecutionFailure;

pub type SnapshotRows<V> = Map<String, V>;
pub type UpdateResult<V> = Result<SnapshotRows<V>, CommandExecutionFailure>;

/// Produces a fresh set of rows, typically by running one listing command.
pub type SnapshotUpdater<V> = Box<dyn Fn() -> Pin<Box<dyn Future<Output = UpdateResult<V>>>>>;

type RefreshResult<V> = Result<Rc<QueueSnapshot<V>>, CommandExecutionFailure>;
type RefreshTask<V> = Pin<Box<dyn Future<Output = RefreshResult<V>>>>;
type RefreshFuture<V> = Shared<RefreshTask<V>>;

/// What a caller does with a stale snapshot while another caller is already refreshing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaleSnapshotPolicy {
    /// Wait for the refresh in flight and use its result.
    #[default]
    Wait,
    /// Use the stale snapshot right away. A snapshot that was never filled is always waited
    /// for.
    ReuseStale,
}

#[derive(Debug)]
pub struct QueueSnapshot<V> {
    rows: SnapshotRows<V>,
    /// `None` until the first successful refresh.
    last_update: Option<DateTime<Utc>>,
}

impl<V> QueueSnapshot<V> {
    pub fn new(rows: SnapshotRows<V>, last_update: DateTime<Utc>) -> Self {
        Self {
            rows,
            last_update: Some(last_update),
        }
    }

    fn empty() -> Self {
        Self {
            rows: Default::default(),
            last_update: None,
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&V> {
        self.rows.get(job_id)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// A snapshot that has never been filled is always stale.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: TimeDelta) -> bool {
        match self.last_update {
            Some(last_update) => now - last_update >= max_age,
            None => true,
        }
    }
}

pub struct QueueCache<V> {
    max_age: TimeDelta,
    stale_snapshot_policy: StaleSnapshotPolicy,
    updater: SnapshotUpdater<V>,
    snapshot: RefCell<Rc<QueueSnapshot<V>>>,
    /// Refresh in flight. It is held weakly so that a refresh whose waiters were all
    /// cancelled is dropped together with its command.
    refresh: RefCell<Option<WeakShared<RefreshTask<V>>>>,
}

impl<V: 'static> QueueCache<V> {
    pub fn new(max_age: Duration, updater: SnapshotUpdater<V>) -> Self {
        Self {
            max_age: TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX),
            stale_snapshot_policy: Default::default(),
            updater,
            snapshot: RefCell::new(Rc::new(QueueSnapshot::empty())),
            refresh: RefCell::new(None),
        }
    }

    pub fn with_stale_snapshot_policy(mut self, policy: StaleSnapshotPolicy) -> Self {
        self.stale_snapshot_policy = policy;
        self
    }

    pub fn max_age(&self) -> TimeDelta {
        self.max_age
    }

    /// The snapshot currently held, without checking its age.
    pub fn current(&self) -> Rc<QueueSnapshot<V>> {
        self.snapshot.borrow().clone()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.snapshot.borrow().last_update()
    }

    /// Looks up one row, refreshing the snapshot first when it is older than `max_age`.
    pub async fn get(&self, job_id: &str) -> Result<Option<V>, CommandExecutionFailure>
    where
        V: Clone,
    {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.get(job_id).cloned())
    }

    /// Returns a snapshot that is not older than `max_age`.
    ///
    /// A failed refresh leaves the held snapshot untouched and its failure is returned to
    /// every caller that waited for it. With [`StaleSnapshotPolicy::ReuseStale`], callers that
    /// find a refresh already in flight get the stale snapshot instead.
    pub async fn snapshot(&self) -> Result<Rc<QueueSnapshot<V>>, CommandExecutionFailure> {
        let current = self.current();
        if !current.is_stale(Utc::now(), self.max_age) {
            return Ok(current);
        }
        if self.stale_snapshot_policy == StaleSnapshotPolicy::ReuseStale
            && current.last_update.is_some()
            && self.is_refreshing()
        {
            return Ok(current);
        }

        let refresh = self.join_refresh();
        let result = refresh.clone().await;

        {
            let mut in_flight = self.refresh.borrow_mut();
            if in_flight
                .as_ref()
                .and_then(|running| running.upgrade())
                .is_some_and(|running| running.ptr_eq(&refresh))
            {
                *in_flight = None;
            }
        }

        let snapshot = result?;
        let mut current = self.snapshot.borrow_mut();
        if snapshot.last_update > current.last_update {
            *current = snapshot.clone();
        }
        Ok(snapshot)
    }

    fn is_refreshing(&self) -> bool {
        self.refresh
            .borrow()
            .as_ref()
            .is_some_and(|running| running.upgrade().is_some())
    }

    /// Returns the refresh in flight, or starts a new one.
    fn join_refresh(&self) -> RefreshFuture<V> {
        let mut in_flight = self.refresh.borrow_mut();
        if let Some(running) = in_flight.as_ref().and_then(|running| running.upgrade()) {
            return running;
        }
        let refresh = self.start_refresh();
        *in_flight = refresh.downgrade();
        refresh
    }

    fn start_refresh(&self) -> RefreshFuture<V> {
        let update = (self.updater)();
        let refresh: RefreshTask<V> = Box::pin(async move {
            let started = Utc::now();
            let rows = update.await?;
            log::debug!("Queue snapshot refreshed with {} rows", rows.len());
            Ok::<_, CommandExecutionFailure>(Rc::new(QueueSnapshot::new(rows, started)))
        });
        refresh.shared()
    }
}
