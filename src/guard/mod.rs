//! Brute-force protection for a login endpoint.
//!
//! The guard reads three rate limiter tiers before credentials are checked,
//! decides whether the attempt may proceed, and records the outcome
//! afterwards.

mod attempt;
mod consumption;
mod decision;
mod login;
mod trust;

pub use attempt::LoginAttempt;
pub use consumption::{record_failure, select_tiers, FailureOutcome};
pub use decision::{decide, denial_for, retry_after_secs, Denial, TierReads, Verdict};
pub use login::{CredentialVerifier, Evaluation, LoginGuard, LoginOutcome, Verification};
pub use trust::{DeviceRegistry, DeviceTrust, MemoryDeviceRegistry, NoTrustedDevices};
