//! Named timer service
//!
//! Every scheduled job in the server is addressed by a `(key, purpose)`
//! pair: auction closes, pre-close reminders, payment chasing. Scheduling
//! against an occupied name atomically replaces the old timer, so a
//! reschedule can never leave two timers racing for the same purpose.
//!
//! # Architecture
//!
//! ```text
//! schedule_once ──┐
//!                 ├──> DashMap<(TimerKey, Purpose), ActiveTimer>
//! schedule_every ─┘         │
//!                           └─ JoinHandle, aborted on cancel/replace
//! ```

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

use shared::{PostId, UserId};

/// What entity a timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    Post(PostId),
    User(UserId),
}

impl std::fmt::Display for TimerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerKey::Post(id) => write!(f, "post:{id}"),
            TimerKey::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Why a timer exists. One live timer per (key, purpose).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Close bidding on an auction
    AuctionEnd,
    /// Fixed-offset reminder this many minutes before the close
    AuctionReminder { minutes_before: u32 },
    /// Recurring "still open" auction reminder
    PeriodicReminder,
    /// Chase an unpaid buyer
    PaymentReminder,
    /// Clear a paid buyer's slate
    PostPaymentReset,
}

struct ActiveTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of named one-shot and repeating timers
pub struct TimerService {
    timers: DashMap<(TimerKey, Purpose), ActiveTimer>,
    generation: AtomicU64,
}

impl TimerService {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `job` once after `delay`.
    ///
    /// Replaces any timer already registered under the same name; the
    /// replaced timer is aborted before the new one is installed, under
    /// the map entry lock.
    pub fn schedule_once<F>(
        self: &Arc<Self>,
        key: TimerKey,
        purpose: Purpose,
        delay: Duration,
        job: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Deregister before running so the job itself may re-schedule
            // under the same name.
            service
                .timers
                .remove_if(&(key, purpose), |_, t| t.generation == generation);
            job.await;
        });
        self.install(key, purpose, ActiveTimer { generation, handle });
    }

    /// Run jobs produced by `make_job` forever, first after
    /// `initial_delay`, then every `period`, until cancelled.
    pub fn schedule_every<F, Fut>(
        self: &Arc<Self>,
        key: TimerKey,
        purpose: Purpose,
        initial_delay: Duration,
        period: Duration,
        mut make_job: F,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                make_job().await;
                tokio::time::sleep(period).await;
            }
        });
        self.install(key, purpose, ActiveTimer { generation, handle });
    }

    /// Cancel a named timer. Returns whether one was registered.
    pub fn cancel(&self, key: TimerKey, purpose: Purpose) -> bool {
        match self.timers.remove(&(key, purpose)) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer registered for one key
    pub fn cancel_all_for(&self, key: TimerKey) -> usize {
        let names: Vec<_> = self
            .timers
            .iter()
            .map(|entry| *entry.key())
            .filter(|(k, _)| *k == key)
            .collect();
        let mut cancelled = 0;
        for (k, purpose) in names {
            if self.cancel(k, purpose) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancel every registered timer, across all keys
    pub fn cancel_all(&self) -> usize {
        let names: Vec<_> = self.timers.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for (key, purpose) in names {
            if self.cancel(key, purpose) {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn is_scheduled(&self, key: TimerKey, purpose: Purpose) -> bool {
        self.timers.contains_key(&(key, purpose))
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn install(&self, key: TimerKey, purpose: Purpose, timer: ActiveTimer) {
        match self.timers.entry((key, purpose)) {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                occupied.insert(timer);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
    }
}
