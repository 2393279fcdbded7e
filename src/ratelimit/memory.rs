//! In-process counter store.
//!
//! Counters live in this process only, so this store is meant for tests and
//! single-instance development. Expiry is lazy: stale entries are replaced on
//! the next consume and hidden from reads. Time comes from `tokio::time` so
//! tests can drive it with a paused clock.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::store::{ConsumeOutcome, Counter, CounterStore, StoreError};
use super::tier::{BlockDuration, TierPolicy};

#[derive(Debug, Clone, Copy)]
struct Slot {
    points: u64,
    /// `None` for an indefinite block
    expires_at: Option<Instant>,
}

impl Slot {
    fn fresh(now: Instant, policy: &TierPolicy) -> Self {
        Self {
            points: 0,
            expires_at: Some(now + policy.window),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn snapshot(&self, now: Instant) -> Counter {
        let ms_before_next = self
            .expires_at
            .map(|at| at.saturating_duration_since(now).as_millis() as u64);
        Counter::new(self.points, ms_before_next)
    }
}

/// Counter store backed by a concurrent map.
///
/// `consume` holds the map's per-key lock for the whole read-modify-write, so
/// increments on one key are serialized while other keys proceed.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, including expired ones not yet replaced.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.slots.retain(|_, slot| !slot.is_expired(now));
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<Counter>, StoreError> {
        let now = Instant::now();
        Ok(self
            .slots
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.snapshot(now)))
    }

    async fn consume(
        &self,
        key: &str,
        cost: u64,
        policy: &TierPolicy,
    ) -> Result<ConsumeOutcome, StoreError> {
        let now = Instant::now();
        let mut slot = self
            .slots
            .entry(key.to_owned())
            .or_insert_with(|| Slot::fresh(now, policy));

        if slot.is_expired(now) {
            *slot = Slot::fresh(now, policy);
        }

        let before = slot.points;
        slot.points = before.saturating_add(cost);

        if slot.points <= policy.points {
            trace!(key = %key, points = slot.points, "Consumed points");
            return Ok(ConsumeOutcome::Consumed(slot.snapshot(now)));
        }

        if before <= policy.points {
            slot.expires_at = match policy.block {
                BlockDuration::For(duration) => Some(now + duration),
                BlockDuration::Indefinite => None,
            };
            debug!(key = %key, points = slot.points, block = ?policy.block, "Key blocked");
        }

        Ok(ConsumeOutcome::Exhausted(slot.snapshot(now)))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }
}
