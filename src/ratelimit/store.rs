//! Counter store interface.
//!
//! The store is the only shared mutable state in the service. It owns the
//! per-key atomicity of `consume`; everything above it is stateless.

use async_trait::async_trait;
use thiserror::Error;

use super::tier::TierPolicy;

/// Snapshot of a counter as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Points recorded in the current window (or while blocked).
    pub consumed_points: u64,
    /// Milliseconds until the key expires. `None` when the key has no
    /// expiry, which only happens for an indefinite block.
    pub ms_before_next: Option<u64>,
}

impl Counter {
    /// Create a counter snapshot.
    pub fn new(consumed_points: u64, ms_before_next: Option<u64>) -> Self {
        Self {
            consumed_points,
            ms_before_next,
        }
    }
}

/// Result of a successful round-trip to the store for `consume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The points fit in the budget.
    Consumed(Counter),
    /// The budget is exceeded; the key is blocked.
    Exhausted(Counter),
}

impl ConsumeOutcome {
    /// The counter state after the consume.
    pub fn counter(&self) -> &Counter {
        match self {
            ConsumeOutcome::Consumed(counter) | ConsumeOutcome::Exhausted(counter) => counter,
        }
    }

    /// Whether the key is now blocked.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ConsumeOutcome::Exhausted(_))
    }
}

/// Infrastructure failures talking to the counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store operation timed out after {0} ms")]
    Timeout(u64),
    #[error("malformed counter store reply: {0}")]
    Malformed(String),
}

/// A keyed, TTL-based atomic counter service.
///
/// Implementations must be safe to call concurrently for different keys and
/// must serialize `consume` calls on the same key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter without counting an attempt.
    async fn get(&self, key: &str) -> Result<Option<Counter>, StoreError>;

    /// Atomically add `cost` points to `key` under `policy`.
    ///
    /// The first consume of a window arms the window expiry. The consume that
    /// crosses the budget re-arms the expiry to the block duration (or clears
    /// it for an indefinite block). Every consume that leaves the key above
    /// the budget returns `Exhausted`.
    async fn consume(
        &self,
        key: &str,
        cost: u64,
        policy: &TierPolicy,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Remove a counter before it expires.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
