//! Login attempt identity and key composition.

use std::fmt;

/// One login attempt as seen by the throttling layer.
///
/// The account identifier is normalized (trimmed, lower-cased) for counter
/// keys so case variants of one account share their counters. The raw value
/// is kept for the credential verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    account: String,
    account_id: String,
    address: String,
    device_token: Option<String>,
}

impl LoginAttempt {
    /// Create an attempt for an account from a source address.
    pub fn new(account: impl Into<String>, address: impl Into<String>) -> Self {
        let account = account.into();
        let account_id = account.trim().to_lowercase();
        Self {
            account,
            account_id,
            address: address.into().trim().to_string(),
            device_token: None,
        }
    }

    /// Attach the client-supplied device token.
    pub fn with_device_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.device_token = if token.is_empty() { None } else { Some(token) };
        self
    }

    /// Account identifier as submitted.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Normalized account identifier used for counters and device trust.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Source address of the client.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    /// Identity of the (account, address) pair for the consecutive-fail tier.
    pub fn pair_id(&self) -> String {
        pair_id(&self.account_id, &self.address)
    }
}

/// Join an account identifier and an address into one identity.
pub(crate) fn pair_id(account_id: &str, address: &str) -> String {
    format!("{}_{}", account_id, address)
}

impl fmt::Display for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.account_id, self.address)
    }
}
