//! Rate limiter tiers.

use std::fmt;
use std::time::Duration;

use tracing::trace;

use super::store::{ConsumeOutcome, Counter, CounterStore, StoreError};

/// One day.
const DAY: Duration = Duration::from_secs(86400);

/// How long a key stays blocked once its budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDuration {
    /// Blocked for a fixed duration after the budget is exceeded.
    For(Duration),
    /// Blocked until the counter is deleted explicitly.
    Indefinite,
}

/// Budget and timing of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Points allowed in one window
    pub points: u64,
    /// Length of the counting window, starting at the first consume
    pub window: Duration,
    /// Block applied when the budget is exceeded
    pub block: BlockDuration,
}

/// The attack dimension a tier protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    /// Many attempts from one address
    IpSlowBrute,
    /// Failures against one account from one address
    ConsecutiveFails,
    /// Failures against one account from many addresses
    AccountSlowBrute,
}

impl TierKind {
    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::IpSlowBrute => "ip_slow_brute",
            TierKind::ConsecutiveFails => "consecutive_fails",
            TierKind::AccountSlowBrute => "account_slow_brute",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named binding of a key space and a policy to the counter store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterTier {
    kind: TierKind,
    key_prefix: String,
    policy: TierPolicy,
}

impl RateLimiterTier {
    /// Create a new tier.
    pub fn new(kind: TierKind, key_prefix: impl Into<String>, policy: TierPolicy) -> Self {
        Self {
            kind,
            key_prefix: key_prefix.into(),
            policy,
        }
    }

    pub fn kind(&self) -> TierKind {
        self.kind
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Point budget of this tier.
    pub fn points(&self) -> u64 {
        self.policy.points
    }

    /// Store key for an identity in this tier's key space.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }

    /// Whether a counter has gone past this tier's budget.
    pub fn is_exceeded(&self, counter: &Counter) -> bool {
        counter.consumed_points > self.policy.points
    }

    /// Read the counter for an identity.
    pub async fn get(
        &self,
        store: &dyn CounterStore,
        identity: &str,
    ) -> Result<Option<Counter>, StoreError> {
        let key = self.key(identity);
        trace!(tier = %self.kind, key = %key, "Reading tier counter");
        store.get(&key).await
    }

    /// Consume points for an identity.
    pub async fn consume(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        cost: u64,
    ) -> Result<ConsumeOutcome, StoreError> {
        let key = self.key(identity);
        trace!(tier = %self.kind, key = %key, cost = cost, "Consuming tier points");
        store.consume(&key, cost, &self.policy).await
    }

    /// Delete the counter for an identity.
    pub async fn delete(&self, store: &dyn CounterStore, identity: &str) -> Result<(), StoreError> {
        let key = self.key(identity);
        trace!(tier = %self.kind, key = %key, "Deleting tier counter");
        store.delete(&key).await
    }
}

/// The three tiers guarding the login endpoint.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSet {
    pub ip: RateLimiterTier,
    pub consecutive: RateLimiterTier,
    pub account: RateLimiterTier,
}

impl TierSet {
    /// Iterate over the tiers in decision order.
    pub fn iter(&self) -> impl Iterator<Item = &RateLimiterTier> {
        [&self.ip, &self.consecutive, &self.account].into_iter()
    }
}

impl Default for TierSet {
    fn default() -> Self {
        Self {
            ip: RateLimiterTier::new(
                TierKind::IpSlowBrute,
                "login_fail_ip_per_day",
                TierPolicy {
                    points: 100,
                    window: DAY,
                    block: BlockDuration::For(DAY),
                },
            ),
            consecutive: RateLimiterTier::new(
                TierKind::ConsecutiveFails,
                "login_fail_consecutive_account_and_ip",
                TierPolicy {
                    points: 10,
                    window: DAY * 90,
                    block: BlockDuration::Indefinite,
                },
            ),
            account: RateLimiterTier::new(
                TierKind::AccountSlowBrute,
                "login_fail_account_per_day",
                TierPolicy {
                    points: 50,
                    window: DAY,
                    block: BlockDuration::Indefinite,
                },
            ),
        }
    }
}
