//! Consumption coordinator.
//!
//! Runs after credential verification failed and records the failure in the
//! tiers that apply to the attempt.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::attempt::LoginAttempt;
use super::decision::{denial_for, Denial};
use crate::ratelimit::{ConsumeOutcome, CounterStore, RateLimiterTier, StoreError, TierSet};

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The failure was counted and no tier is blocked yet.
    Recorded,
    /// At least one tier ran out of points with this failure.
    Throttled(Denial),
}

/// Tiers to charge for a failure, with the identity each one is keyed by.
///
/// Unknown accounts only ever charge the address tier, so probing for
/// accounts cannot grow per-account state.
pub fn select_tiers<'a>(
    tiers: &'a TierSet,
    attempt: &LoginAttempt,
    trusted: bool,
    account_exists: bool,
) -> Vec<(&'a RateLimiterTier, String)> {
    let mut selected = Vec::with_capacity(3);
    if !trusted {
        selected.push((&tiers.ip, attempt.address().to_string()));
    }
    if account_exists {
        selected.push((&tiers.consecutive, attempt.pair_id()));
        if !trusted {
            selected.push((&tiers.account, attempt.account_id().to_string()));
        }
    }
    selected
}

/// Charge one point to every applicable tier, concurrently.
///
/// Every consume is awaited even when another one fails, so no write is
/// abandoned halfway. A store error wins over throttling.
pub async fn record_failure(
    tiers: &TierSet,
    store: &dyn CounterStore,
    attempt: &LoginAttempt,
    trusted: bool,
    account_exists: bool,
) -> Result<FailureOutcome, StoreError> {
    let selected = select_tiers(tiers, attempt, trusted, account_exists);
    debug!(
        attempt = %attempt,
        trusted = trusted,
        account_exists = account_exists,
        tiers = selected.len(),
        "Recording failed attempt"
    );

    let results = join_all(selected.iter().map(|(tier, identity)| async move {
        (*tier, tier.consume(store, identity, 1).await)
    }))
    .await;

    let mut denial: Option<Denial> = None;
    let mut first_error: Option<StoreError> = None;

    for (tier, result) in results {
        match result {
            Ok(ConsumeOutcome::Consumed(_)) => {}
            Ok(ConsumeOutcome::Exhausted(counter)) => {
                let tier_denial = denial_for(tier, &counter);
                info!(
                    tier = %tier.kind(),
                    attempt = %attempt,
                    consumed = counter.consumed_points,
                    limit = tier.points(),
                    "Tier blocked after failed attempt"
                );
                denial = Some(match denial {
                    Some(current) => current.merge(tier_denial),
                    None => tier_denial,
                });
            }
            Err(e) => {
                warn!(tier = %tier.kind(), error = %e, "Failed to record attempt");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(match denial {
        Some(denial) => FailureOutcome::Throttled(denial),
        None => FailureOutcome::Recorded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Counter, MemoryCounterStore, TierKind, TierPolicy};
    use async_trait::async_trait;

    /// Store whose consumes always fail.
    struct BrokenStore;

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Counter>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn consume(
            &self,
            _key: &str,
            _cost: u64,
            _policy: &TierPolicy,
        ) -> Result<ConsumeOutcome, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    /// Memory store that fails consumes for keys under one prefix.
    struct FailingPrefixStore {
        inner: MemoryCounterStore,
        prefix: String,
    }

    #[async_trait]
    impl CounterStore for FailingPrefixStore {
        async fn get(&self, key: &str) -> Result<Option<Counter>, StoreError> {
            self.inner.get(key).await
        }

        async fn consume(
            &self,
            key: &str,
            cost: u64,
            policy: &TierPolicy,
        ) -> Result<ConsumeOutcome, StoreError> {
            if key.starts_with(&self.prefix) {
                return Err(StoreError::Unavailable("down".to_string()));
            }
            self.inner.consume(key, cost, policy).await
        }

        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
    }

    fn kinds(selected: &[(&RateLimiterTier, String)]) -> Vec<TierKind> {
        selected.iter().map(|(tier, _)| tier.kind()).collect()
    }

    #[test]
    fn test_select_untrusted_existing_account() {
        let tiers = TierSet::default();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        let selected = select_tiers(&tiers, &attempt, false, true);

        assert_eq!(
            kinds(&selected),
            vec![
                TierKind::IpSlowBrute,
                TierKind::ConsecutiveFails,
                TierKind::AccountSlowBrute
            ]
        );
        assert_eq!(selected[0].1, "1.2.3.4");
        assert_eq!(selected[1].1, "a@x.com_1.2.3.4");
        assert_eq!(selected[2].1, "a@x.com");
    }

    #[test]
    fn test_select_trusted_existing_account() {
        let tiers = TierSet::default();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        let selected = select_tiers(&tiers, &attempt, true, true);
        assert_eq!(kinds(&selected), vec![TierKind::ConsecutiveFails]);
    }

    #[test]
    fn test_select_unknown_account() {
        let tiers = TierSet::default();
        let attempt = LoginAttempt::new("ghost@x.com", "1.2.3.4");

        let selected = select_tiers(&tiers, &attempt, false, false);
        assert_eq!(kinds(&selected), vec![TierKind::IpSlowBrute]);

        let selected = select_tiers(&tiers, &attempt, true, false);
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_failure_within_budgets_is_recorded() {
        let tiers = TierSet::default();
        let store = MemoryCounterStore::new();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        let outcome = record_failure(&tiers, &store, &attempt, false, true)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Recorded);

        for tier in tiers.iter() {
            let identity = match tier.kind() {
                TierKind::IpSlowBrute => "1.2.3.4".to_string(),
                TierKind::ConsecutiveFails => attempt.pair_id(),
                TierKind::AccountSlowBrute => "a@x.com".to_string(),
            };
            let counter = tier.get(&store, &identity).await.unwrap().unwrap();
            assert_eq!(counter.consumed_points, 1, "tier {}", tier.kind());
        }
    }

    #[tokio::test]
    async fn test_exhausting_consecutive_tier_throttles_permanently() {
        let tiers = TierSet::default();
        let store = MemoryCounterStore::new();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        for _ in 0..10 {
            let outcome = record_failure(&tiers, &store, &attempt, true, true)
                .await
                .unwrap();
            assert_eq!(outcome, FailureOutcome::Recorded);
        }

        let outcome = record_failure(&tiers, &store, &attempt, true, true)
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Throttled(Denial::Permanent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausting_ip_tier_throttles_with_retry_hint() {
        let tiers = TierSet::default();
        let store = MemoryCounterStore::new();
        tiers.ip.consume(&store, "1.2.3.4", 100).await.unwrap();

        let attempt = LoginAttempt::new("ghost@x.com", "1.2.3.4");
        let outcome = record_failure(&tiers, &store, &attempt, false, false)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FailureOutcome::Throttled(Denial::Temporary {
                retry_after_secs: 86400
            })
        );
    }

    #[tokio::test]
    async fn test_store_error_is_not_throttling() {
        let tiers = TierSet::default();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        let result = record_failure(&tiers, &BrokenStore, &attempt, false, true).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_store_error_wins_over_exhaustion_and_siblings_land() {
        let tiers = TierSet::default();
        let store = FailingPrefixStore {
            inner: MemoryCounterStore::new(),
            prefix: format!("{}:", tiers.account.key_prefix()),
        };
        tiers.ip.consume(&store, "1.2.3.4", 100).await.unwrap();

        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        let result = record_failure(&tiers, &store, &attempt, false, true).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let ip = tiers.ip.get(&store, "1.2.3.4").await.unwrap().unwrap();
        assert_eq!(ip.consumed_points, 101);
        let pair = tiers
            .consecutive
            .get(&store, &attempt.pair_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.consumed_points, 1);
        assert!(tiers.account.get(&store, "a@x.com").await.unwrap().is_none());
    }
}
