//! Login guard: the full check, verify, record cycle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::attempt::{pair_id, LoginAttempt};
use super::consumption::{self, FailureOutcome};
use super::decision::{decide, Denial, TierReads, Verdict};
use super::trust::{DeviceRegistry, DeviceTrust};
use crate::error::Result;
use crate::ratelimit::{Counter, CounterStore, TierSet};

/// What the credential verifier found out about an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// The account identifier belongs to a registered account.
    pub exists: bool,
    /// The secret matched.
    pub authenticated: bool,
}

/// External credential verification.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, account: &str, secret: &str) -> Result<Verification>;
}

/// Final answer for a login request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authorized,
    /// Verification failed; which factor failed is not disclosed.
    BadCredentials,
    TooManyRequests(Denial),
}

/// Result of the pre-verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub trusted: bool,
    pub reads: TierReads,
}

/// Brute-force protection for one login endpoint.
///
/// Holds no mutable state of its own; all counters live in the store.
pub struct LoginGuard {
    tiers: Arc<TierSet>,
    store: Arc<dyn CounterStore>,
    devices: Arc<dyn DeviceRegistry>,
}

impl LoginGuard {
    /// Create a guard over a tier set, a counter store and a device registry.
    pub fn new(
        tiers: Arc<TierSet>,
        store: Arc<dyn CounterStore>,
        devices: Arc<dyn DeviceRegistry>,
    ) -> Self {
        Self {
            tiers,
            store,
            devices,
        }
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// Consult the device gate, read all three tiers concurrently and decide.
    ///
    /// A failed read is an error, never an implicit `Proceed`.
    pub async fn evaluate(&self, attempt: &LoginAttempt) -> Result<Evaluation> {
        let trusted = self
            .devices
            .is_trusted(attempt.account_id(), attempt.device_token())
            .await;

        let store = self.store.as_ref();
        let pair = attempt.pair_id();
        let (ip, consecutive, account) = tokio::try_join!(
            self.tiers.ip.get(store, attempt.address()),
            self.tiers.consecutive.get(store, &pair),
            self.tiers.account.get(store, attempt.account_id()),
        )?;

        let reads = TierReads {
            ip,
            consecutive,
            account,
        };
        let verdict = decide(&self.tiers, &reads, trusted);

        debug!(
            attempt = %attempt,
            trusted = trusted,
            verdict = ?verdict,
            "Attempt evaluated"
        );

        Ok(Evaluation {
            verdict,
            trusted,
            reads,
        })
    }

    /// Decide whether credential verification may run for an attempt.
    pub async fn check(&self, attempt: &LoginAttempt) -> Result<Verdict> {
        Ok(self.evaluate(attempt).await?.verdict)
    }

    /// Record a failed verification for callers that verify on their own.
    pub async fn record_failure(
        &self,
        attempt: &LoginAttempt,
        account_exists: bool,
    ) -> Result<FailureOutcome> {
        let trusted = self
            .devices
            .is_trusted(attempt.account_id(), attempt.device_token())
            .await;
        self.consume_failure(attempt, trusted, account_exists).await
    }

    /// Record a successful verification for callers that verify on their own.
    pub async fn record_success(&self, attempt: &LoginAttempt) -> Result<()> {
        let prior = self
            .tiers
            .consecutive
            .get(self.store.as_ref(), &attempt.pair_id())
            .await?;
        self.forgive(attempt, prior).await
    }

    /// Run a complete login: check, verify, then record the outcome.
    #[instrument(skip(self, attempt, secret, verifier), fields(attempt = %attempt))]
    pub async fn login(
        &self,
        attempt: &LoginAttempt,
        secret: &str,
        verifier: &dyn CredentialVerifier,
    ) -> Result<LoginOutcome> {
        let evaluation = self.evaluate(attempt).await?;
        if let Verdict::Deny(denial) = evaluation.verdict {
            return Ok(LoginOutcome::TooManyRequests(denial));
        }

        let verification = verifier.verify(attempt.account(), secret).await?;
        if verification.authenticated {
            self.forgive(attempt, evaluation.reads.consecutive).await?;
            return Ok(LoginOutcome::Authorized);
        }

        match self
            .consume_failure(attempt, evaluation.trusted, verification.exists)
            .await?
        {
            FailureOutcome::Recorded => Ok(LoginOutcome::BadCredentials),
            FailureOutcome::Throttled(denial) => Ok(LoginOutcome::TooManyRequests(denial)),
        }
    }

    /// Lift the account-scoped blocks for an (account, address) pair.
    ///
    /// Clears the consecutive-fail counter for the pair and the account
    /// counter. The address counter is left alone.
    pub async fn unblock(&self, account: &str, address: &str) -> Result<()> {
        let account_id = account.trim().to_lowercase();
        let address = address.trim();
        let pair = pair_id(&account_id, address);
        let store = self.store.as_ref();

        tokio::try_join!(
            self.tiers.consecutive.delete(store, &pair),
            self.tiers.account.delete(store, &account_id),
        )?;

        info!(account = %account_id, address = %address, "Account unblocked");
        Ok(())
    }

    async fn consume_failure(
        &self,
        attempt: &LoginAttempt,
        trusted: bool,
        account_exists: bool,
    ) -> Result<FailureOutcome> {
        Ok(consumption::record_failure(
            &self.tiers,
            self.store.as_ref(),
            attempt,
            trusted,
            account_exists,
        )
        .await?)
    }

    /// Success path: clear consecutive failures for the pair and remember
    /// the device. The address and account tiers keep their counts.
    async fn forgive(&self, attempt: &LoginAttempt, prior: Option<Counter>) -> Result<()> {
        if prior.is_some_and(|counter| counter.consumed_points > 0) {
            self.tiers
                .consecutive
                .delete(self.store.as_ref(), &attempt.pair_id())
                .await?;
            debug!(attempt = %attempt, "Consecutive failures cleared");
        }

        if let Some(token) = attempt.device_token() {
            self.devices.remember(attempt.account_id(), token).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;
    use crate::guard::{DeviceRegistry, DeviceTrust, MemoryDeviceRegistry, NoTrustedDevices};
    use crate::ratelimit::{ConsumeOutcome, MemoryCounterStore, StoreError, TierPolicy};

    /// Verifier with one registered account.
    struct OneAccount;

    #[async_trait]
    impl CredentialVerifier for OneAccount {
        async fn verify(&self, account: &str, secret: &str) -> Result<Verification> {
            let exists = account == "a@x.com";
            Ok(Verification {
                exists,
                authenticated: exists && secret == "correct horse",
            })
        }
    }

    /// Store that cannot be reached.
    struct UnreachableStore;

    #[async_trait]
    impl CounterStore for UnreachableStore {
        async fn get(&self, _key: &str) -> std::result::Result<Option<Counter>, StoreError> {
            Err(StoreError::Timeout(250))
        }

        async fn consume(
            &self,
            _key: &str,
            _cost: u64,
            _policy: &TierPolicy,
        ) -> std::result::Result<ConsumeOutcome, StoreError> {
            Err(StoreError::Timeout(250))
        }

        async fn delete(&self, _key: &str) -> std::result::Result<(), StoreError> {
            Err(StoreError::Timeout(250))
        }
    }

    struct Fixture {
        guard: LoginGuard,
        store: Arc<MemoryCounterStore>,
        devices: Arc<MemoryDeviceRegistry>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryCounterStore::new());
        let devices = Arc::new(MemoryDeviceRegistry::new());
        let guard = LoginGuard::new(
            Arc::new(TierSet::default()),
            store.clone(),
            devices.clone(),
        );
        Fixture {
            guard,
            store,
            devices,
        }
    }

    async fn points(fixture: &Fixture, kind: &str, identity: &str) -> u64 {
        let tiers = fixture.guard.tiers();
        let tier = match kind {
            "ip" => &tiers.ip,
            "consecutive" => &tiers.consecutive,
            _ => &tiers.account,
        };
        tier.get(fixture.store.as_ref(), identity)
            .await
            .unwrap()
            .map(|c| c.consumed_points)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_correct_password_is_authorized() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        let outcome = fx
            .guard
            .login(&attempt, "correct horse", &OneAccount)
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::Authorized);
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_is_bad_credentials() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        assert_eq!(outcome, LoginOutcome::BadCredentials);
        assert_eq!(points(&fx, "ip", "1.2.3.4").await, 1);
        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 1);
        assert_eq!(points(&fx, "account", "a@x.com").await, 1);
    }

    #[tokio::test]
    async fn test_tenth_consecutive_failure_is_not_throttled_eleventh_is() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        fx.guard
            .tiers()
            .consecutive
            .consume(fx.store.as_ref(), &attempt.pair_id(), 9)
            .await
            .unwrap();

        let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        assert_eq!(outcome, LoginOutcome::BadCredentials);
        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 10);

        // The eleventh failure runs verification, then blocks the pair.
        let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        assert_eq!(outcome, LoginOutcome::TooManyRequests(Denial::Permanent));

        // Every later attempt is refused before verification, even with the
        // right password.
        let outcome = fx
            .guard
            .login(&attempt, "correct horse", &OneAccount)
            .await
            .unwrap();
        assert_eq!(outcome, LoginOutcome::TooManyRequests(Denial::Permanent));
    }

    #[tokio::test]
    async fn test_unknown_account_only_charges_address() {
        let fx = fixture();
        let attempt = LoginAttempt::new("ghost@x.com", "5.6.7.8");

        let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        assert_eq!(outcome, LoginOutcome::BadCredentials);
        assert_eq!(points(&fx, "ip", "5.6.7.8").await, 1);
        assert_eq!(points(&fx, "consecutive", "ghost@x.com_5.6.7.8").await, 0);
        assert_eq!(points(&fx, "account", "ghost@x.com").await, 0);
        assert_eq!(fx.store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_address_gets_retry_hint() {
        let fx = fixture();
        fx.guard
            .tiers()
            .ip
            .consume(fx.store.as_ref(), "1.2.3.4", 101)
            .await
            .unwrap();

        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        let verdict = fx.guard.check(&attempt).await.unwrap();
        assert_eq!(
            verdict,
            Verdict::Deny(Denial::Temporary {
                retry_after_secs: 86400
            })
        );
    }

    #[tokio::test]
    async fn test_blocked_account_is_permanent_for_untrusted_devices() {
        let fx = fixture();
        fx.guard
            .tiers()
            .account
            .consume(fx.store.as_ref(), "a@x.com", 51)
            .await
            .unwrap();

        let attempt = LoginAttempt::new("a@x.com", "9.9.9.9");
        assert_eq!(
            fx.guard.check(&attempt).await.unwrap(),
            Verdict::Deny(Denial::Permanent)
        );
    }

    #[tokio::test]
    async fn test_trusted_device_bypasses_address_and_account_tiers() {
        let fx = fixture();
        fx.devices.remember("a@x.com", "laptop").await;
        let store = fx.store.as_ref();
        let tiers = fx.guard.tiers();
        tiers.ip.consume(store, "1.2.3.4", 500).await.unwrap();
        tiers.account.consume(store, "a@x.com", 500).await.unwrap();

        let trusted = LoginAttempt::new("a@x.com", "1.2.3.4").with_device_token("laptop");
        assert_eq!(fx.guard.check(&trusted).await.unwrap(), Verdict::Proceed);

        let untrusted = LoginAttempt::new("a@x.com", "1.2.3.4");
        assert!(fx.guard.check(&untrusted).await.unwrap().is_denied());
    }

    #[tokio::test]
    async fn test_trusted_device_never_bypasses_consecutive_tier() {
        let fx = fixture();
        fx.devices.remember("a@x.com", "laptop").await;
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4").with_device_token("laptop");

        for _ in 0..10 {
            let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
            assert_eq!(outcome, LoginOutcome::BadCredentials);
        }
        // Trusted failures only charge the pair.
        assert_eq!(points(&fx, "ip", "1.2.3.4").await, 0);
        assert_eq!(points(&fx, "account", "a@x.com").await, 0);

        let outcome = fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        assert_eq!(outcome, LoginOutcome::TooManyRequests(Denial::Permanent));
        assert_eq!(
            fx.guard.check(&attempt).await.unwrap(),
            Verdict::Deny(Denial::Permanent)
        );
    }

    #[tokio::test]
    async fn test_success_clears_only_consecutive_counter() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4").with_device_token("phone");

        for _ in 0..3 {
            fx.guard.login(&attempt, "wrong", &OneAccount).await.unwrap();
        }
        let outcome = fx
            .guard
            .login(&attempt, "correct horse", &OneAccount)
            .await
            .unwrap();

        assert_eq!(outcome, LoginOutcome::Authorized);
        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 0);
        assert_eq!(points(&fx, "ip", "1.2.3.4").await, 3);
        assert_eq!(points(&fx, "account", "a@x.com").await, 3);
        assert!(fx.devices.is_trusted("a@x.com", Some("phone")).await);
    }

    #[tokio::test]
    async fn test_success_leaves_other_pairs_alone() {
        let fx = fixture();
        let home = LoginAttempt::new("a@x.com", "1.2.3.4");
        let office = LoginAttempt::new("a@x.com", "4.3.2.1");

        fx.guard.login(&office, "wrong", &OneAccount).await.unwrap();
        fx.guard.login(&home, "wrong", &OneAccount).await.unwrap();
        fx.guard.record_success(&home).await.unwrap();

        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 0);
        assert_eq!(points(&fx, "consecutive", "a@x.com_4.3.2.1").await, 1);
    }

    #[tokio::test]
    async fn test_split_api_records_failure_and_success() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        assert_eq!(fx.guard.check(&attempt).await.unwrap(), Verdict::Proceed);
        let outcome = fx.guard.record_failure(&attempt, true).await.unwrap();
        assert_eq!(outcome, FailureOutcome::Recorded);
        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 1);

        fx.guard.record_success(&attempt).await.unwrap();
        assert_eq!(points(&fx, "consecutive", "a@x.com_1.2.3.4").await, 0);
    }

    #[tokio::test]
    async fn test_unblock_clears_account_scoped_counters() {
        let fx = fixture();
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
        let tiers = fx.guard.tiers();
        let store = fx.store.as_ref();
        tiers.consecutive.consume(store, &attempt.pair_id(), 11).await.unwrap();
        tiers.account.consume(store, "a@x.com", 51).await.unwrap();
        tiers.ip.consume(store, "1.2.3.4", 5).await.unwrap();

        fx.guard.unblock("A@X.com", "1.2.3.4").await.unwrap();

        assert_eq!(fx.guard.check(&attempt).await.unwrap(), Verdict::Proceed);
        assert_eq!(points(&fx, "ip", "1.2.3.4").await, 5);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let guard = LoginGuard::new(
            Arc::new(TierSet::default()),
            Arc::new(UnreachableStore),
            Arc::new(NoTrustedDevices),
        );
        let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");

        let result = guard.login(&attempt, "correct horse", &OneAccount).await;
        assert!(matches!(
            result,
            Err(GuardError::Store(StoreError::Timeout(250)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_each_counted_once() {
        let store = Arc::new(MemoryCounterStore::new());
        let guard = Arc::new(LoginGuard::new(
            Arc::new(TierSet::default()),
            store.clone(),
            Arc::new(NoTrustedDevices),
        ));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move {
                    let attempt = LoginAttempt::new("a@x.com", "1.2.3.4");
                    guard.login(&attempt, "wrong", &OneAccount).await
                })
            })
            .collect();

        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome, LoginOutcome::BadCredentials);
        }

        let tiers = guard.tiers();
        let store = store.as_ref();
        for (tier, identity) in [
            (&tiers.ip, "1.2.3.4"),
            (&tiers.consecutive, "a@x.com_1.2.3.4"),
            (&tiers.account, "a@x.com"),
        ] {
            let counter = tier.get(store, identity).await.unwrap().unwrap();
            assert_eq!(counter.consumed_points, 2, "tier {}", tier.kind());
        }
    }
}
