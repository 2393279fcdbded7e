//! Tier rules configuration.
//!
//! This module loads the three tier definitions from YAML and turns them into
//! the immutable `TierSet` used by the login guard.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::tier::{BlockDuration, RateLimiterTier, TierKind, TierPolicy, TierSet};
use crate::error::{GuardError, Result};

/// Configuration of all three tiers.
///
/// Any tier left out keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiersConfig {
    /// Attempts per address
    #[serde(default = "default_ip_rule")]
    pub ip: TierRule,
    /// Consecutive failures per (account, address) pair
    #[serde(default = "default_consecutive_rule")]
    pub consecutive: TierRule,
    /// Failures per account
    #[serde(default = "default_account_rule")]
    pub account: TierRule,
}

/// A single tier definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierRule {
    /// Key namespace in the counter store
    pub key_prefix: String,
    /// Points allowed per window
    pub points: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Block length in seconds; absent or null blocks indefinitely
    #[serde(default)]
    pub block_secs: Option<u64>,
}

impl TierRule {
    fn validate(&self, tier: TierKind) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(GuardError::Config(format!("{}: key_prefix is empty", tier)));
        }
        if self.points == 0 {
            return Err(GuardError::Config(format!("{}: points must be positive", tier)));
        }
        if self.window_secs == 0 {
            return Err(GuardError::Config(format!(
                "{}: window_secs must be positive",
                tier
            )));
        }
        if self.block_secs == Some(0) {
            return Err(GuardError::Config(format!(
                "{}: block_secs must be positive or omitted",
                tier
            )));
        }
        Ok(())
    }

    fn to_tier(&self, kind: TierKind) -> Result<RateLimiterTier> {
        self.validate(kind)?;
        let block = match self.block_secs {
            Some(secs) => BlockDuration::For(Duration::from_secs(secs)),
            None => BlockDuration::Indefinite,
        };
        Ok(RateLimiterTier::new(
            kind,
            self.key_prefix.clone(),
            TierPolicy {
                points: self.points,
                window: Duration::from_secs(self.window_secs),
                block,
            },
        ))
    }

    fn from_tier(tier: &RateLimiterTier) -> Self {
        let policy = tier.policy();
        Self {
            key_prefix: tier.key_prefix().to_string(),
            points: policy.points,
            window_secs: policy.window.as_secs(),
            block_secs: match policy.block {
                BlockDuration::For(duration) => Some(duration.as_secs()),
                BlockDuration::Indefinite => None,
            },
        }
    }
}

fn default_ip_rule() -> TierRule {
    TierRule::from_tier(&TierSet::default().ip)
}

fn default_consecutive_rule() -> TierRule {
    TierRule::from_tier(&TierSet::default().consecutive)
}

fn default_account_rule() -> TierRule {
    TierRule::from_tier(&TierSet::default().account)
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            ip: default_ip_rule(),
            consecutive: default_consecutive_rule(),
            account: default_account_rule(),
        }
    }
}

impl TiersConfig {
    #[cfg(test)]
    fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse tier rules: {}", e)))
    }

    /// Validate the rules and build the tier set.
    pub fn build(&self) -> Result<TierSet> {
        let tiers = TierSet {
            ip: self.ip.to_tier(TierKind::IpSlowBrute)?,
            consecutive: self.consecutive.to_tier(TierKind::ConsecutiveFails)?,
            account: self.account.to_tier(TierKind::AccountSlowBrute)?,
        };

        let mut prefixes: Vec<&str> = tiers.iter().map(|t| t.key_prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        if prefixes.len() != 3 {
            return Err(GuardError::Config(
                "tiers must use distinct key prefixes".to_string(),
            ));
        }

        Ok(tiers)
    }
}
