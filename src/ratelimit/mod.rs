//! Counter store clients and rate limiter tiers.

mod memory;
mod redis_store;
mod rules;
mod store;
mod tier;

pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use rules::{TierRule, TiersConfig};
pub use store::{ConsumeOutcome, Counter, CounterStore, StoreError};
pub use tier::{BlockDuration, RateLimiterTier, TierKind, TierPolicy, TierSet};
