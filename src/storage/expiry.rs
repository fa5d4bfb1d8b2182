//! Expiration Scheduler
//!
//! Every write with a nonzero TTL leaves a [`Ticket`] in the store's
//! [`ExpiryQueue`]. A background Tokio task drains that queue and removes keys
//! once they fall due.
//!
//! ## Design
//!
//! The queue is a min-heap keyed by deadline. The scheduler loop:
//! 1. Pops every ticket with less than the near-due threshold (default 100ms)
//!    left before its deadline
//! 2. Settles each one against the live keyspace ([`StorageEngine::resolve`])
//! 3. Sleeps until the next ticket becomes near-due, or until a write pushes a
//!    new ticket, whichever comes first
//!
//! ## Stale Tickets
//!
//! A ticket is only a snapshot. By the time it falls due, the key may have been
//! deleted, or overwritten with or without a TTL. The scheduler then
//! *abandons* the ticket instead of reaping: a key is removed only when its
//! live record carries the same generation as the ticket.
//!
//! Stale tickets otherwise wait in the heap until their own deadline. When
//! they come to outnumber the live ones, the store compacts the queue on its
//! next TTL write.
//!
//! ```text
//!   write(k, v, "5s") ──push──> ┌──────────────┐
//!                               │ ExpiryQueue  │ ──pop near-due──> resolve()
//!   write(k, v, "1s") ──push──> │  (min-heap)  │                 ├─ Reaped
//!                               └──────────────┘                 └─ Abandoned
//! ```

use crate::storage::record::Ticket;
use crate::storage::StorageEngine;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace};

/// Configuration for the expiry scheduler.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Tickets with less than this left before their deadline are settled
    /// (default: 100ms)
    pub near_due_threshold: Duration,

    /// Minimum pause between two passes over the queue (default: 10ms)
    pub check_interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            near_due_threshold: Duration::from_millis(100),
            check_interval: Duration::from_millis(10),
        }
    }
}

/// How a near-due ticket was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The key's value and record were removed.
    Reaped,
    /// Nothing was removed.
    Abandoned(AbandonReason),
}

/// Why a ticket was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The key no longer exists.
    Missing,
    /// The key was overwritten without a TTL.
    Persistent,
    /// The key was overwritten with a different TTL; its own ticket is queued.
    Superseded,
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Missing => write!(f, "key no longer exists"),
            AbandonReason::Persistent => write!(f, "overwritten without a TTL"),
            AbandonReason::Superseded => write!(f, "overwritten by a newer write"),
        }
    }
}

/// Deadline-ordered queue of pending expiry tickets.
///
/// Pushing never waits on the scheduler: it holds the heap mutex for a single
/// insertion and then wakes the scheduler task.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    heap: Mutex<BinaryHeap<Reverse<Ticket>>>,
    wakeup: Notify,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn heap(&self) -> MutexGuard<'_, BinaryHeap<Reverse<Ticket>>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a ticket and wakes the scheduler.
    pub fn push(&self, ticket: Ticket) {
        self.heap().push(Reverse(ticket));
        self.wakeup.notify_one();
    }

    /// Removes and returns every ticket that is near-due at `now`, earliest
    /// first.
    pub fn pop_near_due(&self, now: Instant, threshold: Duration) -> Vec<Ticket> {
        let mut heap = self.heap();
        let mut due = Vec::new();

        while heap
            .peek()
            .is_some_and(|Reverse(ticket)| ticket.is_near_due(now, threshold))
        {
            if let Some(Reverse(ticket)) = heap.pop() {
                due.push(ticket);
            }
        }

        due
    }

    /// Keeps only the tickets for which `keep` returns true. Returns how many
    /// were removed.
    pub fn retain(&self, mut keep: impl FnMut(&Ticket) -> bool) -> usize {
        let mut heap = self.heap();
        let before = heap.len();
        heap.retain(|Reverse(ticket)| keep(ticket));
        before - heap.len()
    }

    /// Deadline of the earliest pending ticket.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap().peek().map(|Reverse(ticket)| ticket.deadline)
    }

    /// Number of pending tickets.
    pub fn len(&self) -> usize {
        self.heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Completes when a ticket has been pushed since the last wake-up.
    async fn notified(&self) {
        self.wakeup.notified().await;
    }
}

/// A handle to the running expiry scheduler.
///
/// When this handle is dropped, the scheduler task will be stopped.
#[derive(Debug)]
pub struct ExpiryScheduler {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpiryScheduler {
    /// Starts the expiry scheduler as a background task.
    ///
    /// Must be called from within a Tokio runtime. Start one scheduler per
    /// store: it is the only consumer of the store's expiry queue.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use mukv::storage::{ExpiryConfig, ExpiryScheduler, StorageEngine};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let scheduler = ExpiryScheduler::start(Arc::clone(&engine), ExpiryConfig::default());
    ///
    /// // Keys written with a TTL are now reaped in the background...
    ///
    /// drop(scheduler);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(scheduler_loop(engine, config, shutdown_rx));

        info!("Expiry scheduler started");

        Self { shutdown_tx }
    }

    /// Stops the expiry scheduler.
    ///
    /// This is called automatically when the handle is dropped. Tickets still
    /// in the queue stay there.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Expiry scheduler stopped");
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main scheduler loop.
async fn scheduler_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let queue = engine.expiry_queue();

    loop {
        settle_due(&engine, &config);

        let wait = queue.next_deadline().map(|deadline| {
            deadline
                .saturating_duration_since(Instant::now())
                .saturating_sub(config.near_due_threshold)
                .max(config.check_interval)
        });

        trace!(
            pending = queue.len(),
            wait_ms = wait.map(|w| w.as_millis() as u64),
            "Expiry scheduler waiting"
        );

        let sleep = async {
            match wait {
                Some(wait) => tokio::time::sleep(wait).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry scheduler received shutdown signal");
                    return;
                }
            }
            _ = queue.notified() => {}
            _ = sleep => {}
        }
    }
}

/// Settles every near-due ticket. Returns how many keys were reaped.
fn settle_due(engine: &StorageEngine, config: &ExpiryConfig) -> usize {
    let due = engine
        .expiry_queue()
        .pop_near_due(Instant::now(), config.near_due_threshold);

    let mut reaped = 0;
    for ticket in &due {
        match engine.resolve(ticket) {
            Resolution::Reaped => {
                reaped += 1;
                debug!(key = %ticket.key, generation = ticket.generation, "Key expired");
            }
            Resolution::Abandoned(reason) => {
                debug!(
                    key = %ticket.key,
                    generation = ticket.generation,
                    reason = %reason,
                    "Expiry ticket abandoned"
                );
            }
        }
    }

    if reaped > 0 {
        debug!(
            reaped = reaped,
            keys_remaining = engine.len(),
            "Expired keys cleaned up"
        );
    }

    reaped
}

/// Starts the expiry scheduler with default configuration.
pub fn start_expiry_scheduler(engine: Arc<StorageEngine>) -> ExpiryScheduler {
    ExpiryScheduler::start(engine, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ticket(key: &str, deadline: Instant, generation: u64) -> Ticket {
        Ticket {
            key: key.to_string(),
            deadline,
            ttl: Duration::from_secs(1),
            generation,
        }
    }

    #[test]
    fn test_queue_pops_only_near_due() {
        let queue = ExpiryQueue::new();
        let now = Instant::now();

        queue.push(ticket("late", now + Duration::from_secs(10), 1));
        queue.push(ticket("soon", now + Duration::from_millis(50), 2));
        queue.push(ticket("past", now, 3));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.next_deadline(), Some(now));

        let due = queue.pop_near_due(now, Duration::from_millis(100));
        let keys: Vec<&str> = due.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["past", "soon"]);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_settle_due_uses_threshold() {
        let engine = StorageEngine::new();
        engine.write("k", Bytes::from("v"), "50ms").unwrap();
        engine.write("far", Bytes::from("v"), "1h").unwrap();

        // 50ms left is already inside the 100ms window.
        assert_eq!(settle_due(&engine, &ExpiryConfig::default()), 1);
        assert!(engine.read("k").unwrap_err().is_not_found());
        assert_eq!(engine.read("far").unwrap(), Bytes::from("v"));
        assert_eq!(engine.stats().pending_expiries, 1);
    }

    #[tokio::test]
    async fn test_scheduler_reaps_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine
                .write(format!("key{}", i), Bytes::from("value"), "150ms")
                .unwrap();
        }
        engine.write("persistent", Bytes::from("value"), "").unwrap();
        assert_eq!(engine.len(), 11);

        let _scheduler = start_expiry_scheduler(Arc::clone(&engine));

        // Not yet within the near-due window.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.len(), 11);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(engine.len(), 1);
        assert!(engine.read("persistent").is_ok());
        assert_eq!(engine.stats().reaped, 10);
    }

    #[tokio::test]
    async fn test_scheduler_wakes_for_new_tickets() {
        let engine = Arc::new(StorageEngine::new());
        let _scheduler = start_expiry_scheduler(Arc::clone(&engine));

        // Let the scheduler park on an empty queue first.
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.write("k", Bytes::from("v"), "120ms").unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(engine.read("k").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_overwrite_without_ttl_cancels_expiry() {
        let engine = Arc::new(StorageEngine::new());
        let _scheduler = start_expiry_scheduler(Arc::clone(&engine));

        engine.write("k", Bytes::from("v1"), "200ms").unwrap();
        engine.write("k", Bytes::from("v2"), "").unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(engine.read("k").unwrap(), Bytes::from("v2"));
        assert_eq!(engine.time_to_expiry("k").unwrap(), 0.0);
        assert_eq!(engine.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_overwrite_with_longer_ttl_survives_stale_ticket() {
        let engine = Arc::new(StorageEngine::new());
        let _scheduler = start_expiry_scheduler(Arc::clone(&engine));

        engine.write("k", Bytes::from("v1"), "150ms").unwrap();
        engine.write("k", Bytes::from("v2"), "600ms").unwrap();

        // The first ticket falls due and must leave the newer write alone.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.read("k").unwrap(), Bytes::from("v2"));

        // The second ticket reaps it at its own deadline.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(engine.read("k").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deleted_key_ticket_is_abandoned() {
        let engine = Arc::new(StorageEngine::new());
        let _scheduler = start_expiry_scheduler(Arc::clone(&engine));

        engine.write("k", Bytes::from("v"), "120ms").unwrap();
        assert!(engine.delete("k"));

        tokio::time::sleep(Duration::from_millis(250)).await;

        let stats = engine.stats();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.reaped, 0);
        assert_eq!(stats.pending_expiries, 0);
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _scheduler = start_expiry_scheduler(Arc::clone(&engine));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.write("k", Bytes::from("v"), "20ms").unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Nobody reaps once the scheduler is gone.
        assert_eq!(engine.read("k").unwrap(), Bytes::from("v"));
        assert_eq!(engine.stats().pending_expiries, 1);
    }
}
