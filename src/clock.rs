// Scheduling abstraction for the poll loop
// Absolute deadlines come from the backend as wall-clock times, backoffs are relative

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::Notify,
    time::{sleep_until, Instant as TokioInstant},
};

#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    // Suspend until `deadline`; returns immediately if it is already past
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    async fn sleep(&self, duration: Duration);
}

// Time left until `deadline`, clamped to zero
pub fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let wait = remaining(Utc::now(), deadline);
        if wait > Duration::ZERO {
            sleep_until(TokioInstant::now() + wait).await;
        }
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// A suspension observed by ManualScheduler, with the amount of virtual time it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedWait {
    Until(Duration),
    For(Duration),
}

// Simulated clock: sleeping advances virtual time instantly and yields to other tasks
pub struct ManualScheduler {
    now: parking_lot::Mutex<DateTime<Utc>>,
    waits: parking_lot::Mutex<Vec<RecordedWait>>,
    // Position in `waits` -> gate the sleeper blocks on
    holds: parking_lot::Mutex<HashMap<usize, Arc<Notify>>>,
}

impl ManualScheduler {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
            waits: parking_lot::Mutex::new(Vec::new()),
            holds: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn waits(&self) -> Vec<RecordedWait> {
        self.waits.lock().clone()
    }

    // The wait recorded at position `index` blocks until the returned gate is notified
    pub fn hold_wait(&self, index: usize) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.holds.lock().insert(index, gate.clone());
        gate
    }

    async fn record(&self, wait: RecordedWait) {
        let gate = {
            let mut waits = self.waits.lock();
            waits.push(wait);
            self.holds.lock().remove(&(waits.len() - 1))
        };
        match gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let waited = {
            let mut now = self.now.lock();
            let waited = remaining(*now, deadline);
            if deadline > *now {
                *now = deadline;
            }
            waited
        };
        self.record(RecordedWait::Until(waited)).await;
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.record(RecordedWait::For(duration)).await;
    }
}
