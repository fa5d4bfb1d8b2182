//! Record Store
//!
//! This module implements the authoritative keyspace for MuKV: a map from key to
//! value, and a co-indexed map from key to [`Record`] metadata.
//!
//! ## Consistency
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                StorageEngine                 │
//! │  ┌────────────────────────────────────────┐  │
//! │  │            RwLock<Keyspace>            │  │
//! │  │  values:  key -> Bytes                 │  │
//! │  │  records: key -> Record                │  │
//! │  └────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  ExpiryQueue (deadline min-heap)       │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Both maps sit behind a single `RwLock`, so a key is present in `values`
//! exactly when it is present in `records` for every caller. Writes, deletes,
//! reads (which bump the hit counter) and touches take the lock exclusively;
//! TTL queries and accessors share it.
//!
//! Every write is stamped with a fresh generation number. Writes with a TTL
//! push a [`Ticket`] onto the expiry queue, and the scheduler only reaps a key
//! whose live record still carries that ticket's generation.

use crate::storage::error::{StoreError, StoreResult};
use crate::storage::expiry::{AbandonReason, ExpiryQueue, Resolution};
use crate::storage::record::{Record, Ticket};
use crate::storage::ttl::parse_ttl;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;

/// Queues shorter than this are never compacted.
const MIN_COMPACTION_LEN: usize = 1024;

/// The queue is compacted once it holds more than this many tickets per live
/// TTL record.
const STALE_TICKET_RATIO: usize = 2;

/// The two co-indexed maps. Only ever accessed through the engine's lock.
#[derive(Debug, Default)]
struct Keyspace {
    values: HashMap<String, Bytes>,
    records: HashMap<String, Record>,
    /// Live records that have a ticket in the expiry queue
    ticketed: usize,
}

impl Keyspace {
    fn insert(&mut self, key: String, value: Bytes, record: Record) {
        if record.deadline().is_some() {
            self.ticketed += 1;
        }
        self.values.insert(key.clone(), value);
        if let Some(old) = self.records.insert(key, record) {
            self.forget(&old);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        let had_value = self.values.remove(key).is_some();
        match self.records.remove(key) {
            Some(old) => {
                self.forget(&old);
                true
            }
            None => had_value,
        }
    }

    fn forget(&mut self, record: &Record) {
        if record.deadline().is_some() {
            self.ticketed -= 1;
        }
    }

    /// True if `ticket` was issued for the live record of its key.
    fn is_current(&self, ticket: &Ticket) -> bool {
        self.records
            .get(&ticket.key)
            .is_some_and(|record| record.generation() == ticket.generation)
    }
}

/// The record store.
///
/// Wrap it in an `Arc` and share it between connection tasks and the expiry
/// scheduler. All operations are synchronous and hold the keyspace lock only
/// for the duration of a map update.
///
/// # Example
///
/// ```
/// use mukv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.write("name", Bytes::from("blue"), "").unwrap();
/// assert_eq!(engine.read("name").unwrap(), Bytes::from("blue"));
/// assert_eq!(engine.hits("name"), Some(1));
///
/// engine.write("session", Bytes::from("abc123"), "60s").unwrap();
/// assert!(engine.time_to_expiry("session").unwrap() > 59.0);
/// ```
pub struct StorageEngine {
    keyspace: RwLock<Keyspace>,

    /// Pending expiry tickets, drained by the scheduler
    expiry: ExpiryQueue,

    /// Source of per-write generation stamps
    next_generation: AtomicU64,

    read_count: AtomicU64,
    write_count: AtomicU64,
    delete_count: AtomicU64,
    reaped_count: AtomicU64,
    abandoned_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.len())
            .field("pending_expiries", &self.expiry.len())
            .field("write_count", &self.write_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            keyspace: RwLock::new(Keyspace::default()),
            expiry: ExpiryQueue::new(),
            next_generation: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
            reaped_count: AtomicU64::new(0),
            abandoned_count: AtomicU64::new(0),
        }
    }

    fn keyspace(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.keyspace.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn keyspace_mut(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.keyspace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The queue the expiry scheduler drains.
    pub(crate) fn expiry_queue(&self) -> &ExpiryQueue {
        &self.expiry
    }

    /// Stores `value` under `key` with a TTL given as text.
    ///
    /// `ttl_spec` is parsed by [`parse_ttl`]; an empty spec means the key never
    /// expires. Any existing value and record for the key are replaced, which
    /// also resets the hit counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTtl`] if `ttl_spec` cannot be parsed. The
    /// store is left untouched in that case.
    pub fn write(
        &self,
        key: impl Into<String>,
        value: Bytes,
        ttl_spec: &str,
    ) -> StoreResult<Record> {
        let ttl = parse_ttl(ttl_spec)?;
        Ok(self.write_with_ttl(key, value, ttl))
    }

    /// Stores `value` under `key` with an already-parsed TTL.
    ///
    /// A zero `ttl` means the key never expires.
    pub fn write_with_ttl(&self, key: impl Into<String>, value: Bytes, ttl: Duration) -> Record {
        self.write_count.fetch_add(1, Ordering::Relaxed);

        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let record = Record::new(key.clone(), ttl, generation);

        let ticketed = {
            let mut keyspace = self.keyspace_mut();
            keyspace.insert(key.clone(), value, record.clone());
            keyspace.ticketed
        };

        if let Some(ticket) = record.ticket() {
            self.expiry.push(ticket);
            self.compact_expiry_queue(ticketed);
        }

        debug!(
            key = %key,
            ttl_ms = ttl.as_millis() as u64,
            generation = generation,
            "key written"
        );

        record
    }

    /// Returns the value stored under `key` and counts the access.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    pub fn read(&self, key: &str) -> StoreResult<Bytes> {
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let mut keyspace = self.keyspace_mut();
        let Keyspace { values, records, .. } = &mut *keyspace;

        match (values.get(key), records.get_mut(key)) {
            (Some(value), Some(record)) => {
                let hits = record.record_hit();
                debug!(key = %key, hits = hits, "key read");
                Ok(value.clone())
            }
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Remaining lifetime of `key` in seconds.
    ///
    /// Returns `0.0` for keys without a TTL. The result is negative when the
    /// deadline has passed but the key has not been reaped yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    pub fn time_to_expiry(&self, key: &str) -> StoreResult<f64> {
        self.keyspace()
            .records
            .get(key)
            .map(Record::time_to_expiry)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Resets the hit counter of `key` and returns it (always `0`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    pub fn touch(&self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace_mut();
        let record = keyspace
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        record.touch();
        debug!(key = %key, "key touched");
        Ok(record.hits())
    }

    /// Removes `key` and its metadata.
    ///
    /// Returns `true` if the key existed.
    pub fn delete(&self, key: &str) -> bool {
        self.delete_count.fetch_add(1, Ordering::Relaxed);

        self.keyspace_mut().remove(key)
    }

    /// Current hit count of `key`, if present.
    pub fn hits(&self, key: &str) -> Option<u64> {
        self.keyspace().records.get(key).map(Record::hits)
    }

    /// A copy of the live record for `key`, if present.
    pub fn record(&self, key: &str) -> Option<Record> {
        self.keyspace().records.get(key).cloned()
    }

    /// Settles a near-due ticket against the live keyspace.
    ///
    /// The key is removed only if its live record is the very write the ticket
    /// was issued for. The check and the removal happen under one exclusive
    /// lock.
    pub fn resolve(&self, ticket: &Ticket) -> Resolution {
        let resolution = {
            let mut keyspace = self.keyspace_mut();

            let resolution = match keyspace.records.get(&ticket.key) {
                None => Resolution::Abandoned(AbandonReason::Missing),
                Some(record) if !record.has_ttl() => {
                    Resolution::Abandoned(AbandonReason::Persistent)
                }
                Some(record) if record.generation() != ticket.generation => {
                    Resolution::Abandoned(AbandonReason::Superseded)
                }
                Some(_) => Resolution::Reaped,
            };

            if resolution == Resolution::Reaped {
                keyspace.remove(&ticket.key);
            }

            resolution
        };

        match resolution {
            Resolution::Reaped => self.reaped_count.fetch_add(1, Ordering::Relaxed),
            Resolution::Abandoned(_) => self.abandoned_count.fetch_add(1, Ordering::Relaxed),
        };

        resolution
    }

    /// Drops tickets for overwritten or deleted keys once they clearly
    /// outnumber the live ones, so rewriting a key with a long TTL in a loop
    /// does not grow the queue without bound.
    ///
    /// Dropped tickets count as abandoned.
    fn compact_expiry_queue(&self, ticketed: usize) {
        let pending = self.expiry.len();
        if pending < MIN_COMPACTION_LEN || pending <= ticketed.saturating_mul(STALE_TICKET_RATIO) {
            return;
        }

        let dropped = {
            let keyspace = self.keyspace();
            self.expiry.retain(|ticket| keyspace.is_current(ticket))
        };

        self.abandoned_count
            .fetch_add(dropped as u64, Ordering::Relaxed);
        debug!(
            dropped = dropped,
            pending = pending.saturating_sub(dropped),
            "Expiry queue compacted"
        );
    }

    /// Number of keys in the store.
    pub fn len(&self) -> usize {
        self.keyspace().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len() as u64,
            pending_expiries: self.expiry.len() as u64,
            reads: self.read_count.load(Ordering::Relaxed),
            writes: self.write_count.load(Ordering::Relaxed),
            deletes: self.delete_count.load(Ordering::Relaxed),
            reaped: self.reaped_count.load(Ordering::Relaxed),
            abandoned: self.abandoned_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: u64,
    pub pending_expiries: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub reaped: u64,
    pub abandoned: u64,
}
