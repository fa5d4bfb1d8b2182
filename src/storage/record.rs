//! Record Metadata
//!
//! A [`Record`] holds everything the store tracks about a key besides its
//! value: when it was last written, how long it lives, how often it has been
//! read, and which write produced it.
//!
//! TTL and creation time are fixed for the lifetime of a record. A later write
//! to the same key builds a fresh record rather than editing this one; only
//! the hit counter changes in place.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Metadata for one stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    key: String,
    created: Instant,
    ttl: Duration,
    hits: u64,
    generation: u64,
}

impl Record {
    /// Creates the record for a write that happens now.
    ///
    /// A zero `ttl` means the record never expires. `generation` must be
    /// unique per write; the expiry scheduler uses it to tell a record apart
    /// from the one it replaced.
    pub fn new(key: impl Into<String>, ttl: Duration, generation: u64) -> Self {
        Self {
            key: key.into(),
            created: Instant::now(),
            ttl,
            hits: 0,
            generation,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if the record was written with a nonzero TTL.
    #[inline]
    pub fn has_ttl(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Time elapsed since the record was written.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// When the record is due to expire, or `None` if it never expires.
    ///
    /// A TTL too long to be represented as an `Instant` never expires either.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.has_ttl() {
            return None;
        }
        self.created.checked_add(self.ttl)
    }

    /// Checks if the record has outlived its TTL.
    ///
    /// Records without a TTL never expire.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.has_ttl() && self.age() >= self.ttl
    }

    /// Remaining lifetime in seconds.
    ///
    /// Returns `0.0` for records without a TTL. Goes negative once the deadline
    /// has passed but the scheduler has not reaped the record yet.
    pub fn time_to_expiry(&self) -> f64 {
        if !self.has_ttl() {
            return 0.0;
        }
        self.ttl.as_secs_f64() - self.age().as_secs_f64()
    }

    /// Counts one read access and returns the new total.
    pub fn record_hit(&mut self) -> u64 {
        self.hits = self.hits.saturating_add(1);
        self.hits
    }

    /// Resets the hit counter.
    pub fn touch(&mut self) {
        self.hits = 0;
    }

    /// Snapshots this record for the expiry scheduler.
    ///
    /// Returns `None` for records without a TTL.
    pub fn ticket(&self) -> Option<Ticket> {
        self.deadline().map(|deadline| Ticket {
            key: self.key.clone(),
            deadline,
            ttl: self.ttl,
            generation: self.generation,
        })
    }
}

/// A snapshot of a TTL-bearing record, queued for an expiry check.
///
/// Tickets order by deadline (earliest first), then by generation, so that a
/// min-heap of tickets pops them in the order they fall due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub key: String,
    pub deadline: Instant,
    pub ttl: Duration,
    pub generation: u64,
}

impl Ticket {
    /// Remaining time before the deadline, saturating at zero.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// A ticket is near-due once less than `threshold` remains.
    pub fn is_near_due(&self, now: Instant, threshold: Duration) -> bool {
        self.remaining(now) < threshold
    }
}

impl Ord for Ticket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for Ticket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_ttl() {
        let record = Record::new("name", Duration::ZERO, 1);
        assert!(!record.has_ttl());
        assert!(!record.is_expired());
        assert_eq!(record.time_to_expiry(), 0.0);
        assert!(record.deadline().is_none());
        assert!(record.ticket().is_none());
    }

    #[test]
    fn test_record_with_ttl() {
        let record = Record::new("session", Duration::from_secs(5), 7);
        let remaining = record.time_to_expiry();
        assert!(remaining > 4.9 && remaining <= 5.0);
        assert!(!record.is_expired());

        let ticket = record.ticket().unwrap();
        assert_eq!(ticket.key, "session");
        assert_eq!(ticket.ttl, Duration::from_secs(5));
        assert_eq!(ticket.generation, 7);
        assert_eq!(ticket.deadline, record.created() + Duration::from_secs(5));
    }

    #[test]
    fn test_unrepresentable_deadline_never_expires() {
        let record = Record::new("k", Duration::MAX, 1);
        assert!(record.has_ttl());
        assert!(record.deadline().is_none());
        assert!(record.ticket().is_none());
        assert!(!record.is_expired());
    }

    #[test]
    fn test_record_expires() {
        let record = Record::new("short", Duration::from_millis(10), 1);
        std::thread::sleep(Duration::from_millis(30));
        assert!(record.is_expired());
        assert!(record.time_to_expiry() < 0.0);
    }

    #[test]
    fn test_hits_and_touch() {
        let mut record = Record::new("k", Duration::ZERO, 1);
        assert_eq!(record.record_hit(), 1);
        assert_eq!(record.record_hit(), 2);
        assert_eq!(record.hits(), 2);

        record.touch();
        assert_eq!(record.hits(), 0);
    }

    #[test]
    fn test_ticket_ordering() {
        let now = Instant::now();
        let early = Ticket {
            key: "a".into(),
            deadline: now + Duration::from_millis(10),
            ttl: Duration::from_millis(10),
            generation: 2,
        };
        let late = Ticket {
            key: "b".into(),
            deadline: now + Duration::from_millis(20),
            ttl: Duration::from_millis(20),
            generation: 1,
        };
        assert!(early < late);

        let mut heap = std::collections::BinaryHeap::new();
        heap.push(std::cmp::Reverse(late.clone()));
        heap.push(std::cmp::Reverse(early.clone()));
        assert_eq!(heap.pop().unwrap().0, early);
        assert_eq!(heap.pop().unwrap().0, late);
    }

    #[test]
    fn test_ticket_near_due() {
        let now = Instant::now();
        let ticket = Ticket {
            key: "k".into(),
            deadline: now + Duration::from_millis(50),
            ttl: Duration::from_millis(50),
            generation: 1,
        };
        assert!(ticket.is_near_due(now, Duration::from_millis(100)));
        assert!(!ticket.is_near_due(now, Duration::from_millis(10)));
    }
}
