//! Decision engine.
//!
//! Turns the current state of the three tiers into a verdict before any
//! credential check runs. Rules are evaluated in order and the first match
//! wins:
//!
//! 1. untrusted device and the address is over its budget
//! 2. the (account, address) pair is over its consecutive-fail budget
//! 3. untrusted device and the account is over its budget
//!
//! Device trust never bypasses rule 2.

use tracing::debug;

use crate::ratelimit::{BlockDuration, Counter, RateLimiterTier, TierSet};

/// Why an attempt is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Refused until the block lifts.
    Temporary { retry_after_secs: u64 },
    /// Refused with no retry time; the caller should treat it as indefinite.
    Permanent,
}

impl Denial {
    /// Retry hint in seconds, only for temporary denials.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Denial::Temporary { retry_after_secs } => Some(*retry_after_secs),
            Denial::Permanent => None,
        }
    }

    /// Combine two denials: permanent wins, otherwise the longer wait wins.
    pub fn merge(self, other: Denial) -> Denial {
        match (self, other) {
            (Denial::Permanent, _) | (_, Denial::Permanent) => Denial::Permanent,
            (
                Denial::Temporary { retry_after_secs: a },
                Denial::Temporary { retry_after_secs: b },
            ) => Denial::Temporary {
                retry_after_secs: a.max(b),
            },
        }
    }
}

/// Outcome of the pre-verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Credential verification may run.
    Proceed,
    /// The attempt is refused.
    Deny(Denial),
}

impl Verdict {
    pub fn is_denied(&self) -> bool {
        matches!(self, Verdict::Deny(_))
    }
}

/// Counter reads for one attempt, one per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierReads {
    pub ip: Option<Counter>,
    pub consecutive: Option<Counter>,
    pub account: Option<Counter>,
}

/// Seconds to wait for `ms` milliseconds, rounded up, at least one.
pub fn retry_after_secs(ms: u64) -> u64 {
    ms.div_ceil(1000).max(1)
}

/// The denial a tier imposes on a counter over its budget.
///
/// Timed blocks give a retry hint; indefinite blocks give none.
pub fn denial_for(tier: &RateLimiterTier, counter: &Counter) -> Denial {
    match tier.policy().block {
        BlockDuration::Indefinite => Denial::Permanent,
        BlockDuration::For(block) => {
            let ms = counter
                .ms_before_next
                .unwrap_or(block.as_millis() as u64);
            Denial::Temporary {
                retry_after_secs: retry_after_secs(ms),
            }
        }
    }
}

/// Decide whether an attempt may proceed to credential verification.
pub fn decide(tiers: &TierSet, reads: &TierReads, trusted: bool) -> Verdict {
    let rules = [
        (&tiers.ip, reads.ip.as_ref(), !trusted),
        (&tiers.consecutive, reads.consecutive.as_ref(), true),
        (&tiers.account, reads.account.as_ref(), !trusted),
    ];

    for (tier, counter, enforced) in rules {
        let Some(counter) = counter else { continue };
        if enforced && tier.is_exceeded(counter) {
            let denial = denial_for(tier, counter);
            debug!(
                tier = %tier.kind(),
                consumed = counter.consumed_points,
                limit = tier.points(),
                denial = ?denial,
                "Attempt denied"
            );
            return Verdict::Deny(denial);
        }
    }

    Verdict::Proceed
}
