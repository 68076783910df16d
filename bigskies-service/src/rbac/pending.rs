//! Bounded queue of in-flight RBAC validations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::messages::UserContext;

/// One message parked while the security coordinator decides
///
/// Resource and action ride along so terminal audit records can name what
/// the caller was asking for.
#[derive(Debug, Clone)]
pub struct PendingValidation {
    pub correlation_id: String,
    pub original_topic: String,
    pub original_payload: Vec<u8>,
    pub user_context: UserContext,
    pub resource: String,
    pub action: String,
    pub received_at: Instant,
    pub expires_at: Instant,
}

/// Concurrent pending-validation table with a hard capacity bound
///
/// The depth counter is reserved before the record is inserted, so the
/// capacity invariant holds at every instant even under concurrent inserts.
pub struct PendingQueue {
    entries: DashMap<String, PendingValidation>,
    depth: AtomicUsize,
    high_water: AtomicUsize,
    max_size: usize,
}

impl PendingQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            depth: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            max_size,
        }
    }

    /// Insert a record, failing with `QueueOverflow` at capacity
    pub fn insert(&self, record: PendingValidation) -> Result<()> {
        // Reserve a slot first; roll back if the map rejects the id
        let reserved = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                (depth < self.max_size).then_some(depth + 1)
            });

        if reserved.is_err() {
            return Err(Error::QueueOverflow);
        }

        let correlation_id = record.correlation_id.clone();
        if self.entries.insert(correlation_id.clone(), record).is_some() {
            // Duplicate correlation ids must not occur; restore the count
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Internal(format!(
                "duplicate correlation id {}",
                correlation_id
            )));
        }

        self.high_water.fetch_max(self.depth.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    }

    /// Atomically take a record by correlation id
    pub fn remove(&self, correlation_id: &str) -> Option<PendingValidation> {
        let removed = self.entries.remove(correlation_id).map(|(_, record)| record);
        if removed.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Remove and return every expired record
    pub fn sweep_expired(&self, now: Instant) -> Vec<PendingValidation> {
        let expired_ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.remove(&id))
            .collect()
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(id: &str, ttl: Duration) -> PendingValidation {
        let now = Instant::now();
        PendingValidation {
            correlation_id: id.to_string(),
            original_topic: "bigskies/coordinator/telescope/control/slew".to_string(),
            original_payload: b"{}".to_vec(),
            user_context: UserContext::anonymous(),
            resource: "telescope".to_string(),
            action: "control".to_string(),
            received_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let queue = PendingQueue::new(10);
        queue.insert(record("c-1", Duration::from_secs(30))).unwrap();
        assert_eq!(queue.depth(), 1);

        let taken = queue.remove("c-1").unwrap();
        assert_eq!(taken.correlation_id, "c-1");
        assert_eq!(queue.depth(), 0);

        // Second removal finds nothing and does not underflow
        assert!(queue.remove("c-1").is_none());
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_overflow_at_capacity() {
        let queue = PendingQueue::new(2);
        queue.insert(record("c-1", Duration::from_secs(30))).unwrap();
        queue.insert(record("c-2", Duration::from_secs(30))).unwrap();

        let err = queue.insert(record("c-3", Duration::from_secs(30))).unwrap_err();
        assert!(matches!(err, Error::QueueOverflow));

        // The rejected record was never added
        assert_eq!(queue.depth(), 2);
        assert!(queue.remove("c-3").is_none());
    }

    #[test]
    fn test_high_water_mark() {
        let queue = PendingQueue::new(10);
        queue.insert(record("c-1", Duration::from_secs(30))).unwrap();
        queue.insert(record("c-2", Duration::from_secs(30))).unwrap();
        queue.remove("c-1");
        queue.insert(record("c-3", Duration::from_secs(30))).unwrap();

        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.high_water(), 2);
    }

    #[test]
    fn test_duplicate_correlation_id_rejected() {
        let queue = PendingQueue::new(10);
        queue.insert(record("c-1", Duration::from_secs(30))).unwrap();
        let err = queue.insert(record("c-1", Duration::from_secs(30))).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let queue = PendingQueue::new(10);
        queue.insert(record("stale", Duration::from_millis(0))).unwrap();
        queue.insert(record("fresh", Duration::from_secs(60))).unwrap();

        let swept = queue.sweep_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].correlation_id, "stale");
        assert_eq!(queue.depth(), 1);
        assert!(queue.remove("fresh").is_some());
    }

    #[test]
    fn test_capacity_restored_after_sweep() {
        let queue = PendingQueue::new(1);
        queue.insert(record("stale", Duration::from_millis(0))).unwrap();
        assert!(queue.insert(record("next", Duration::from_secs(30))).is_err());

        queue.sweep_expired(Instant::now() + Duration::from_millis(1));
        queue.insert(record("next", Duration::from_secs(30))).unwrap();
        assert_eq!(queue.depth(), 1);
    }
}
