//! Loginguard - Brute-Force Protection for Login Endpoints
//!
//! This crate decides, per login attempt, whether credential verification may
//! run or whether the attempt is refused as a probable brute-force attempt.
//! Three rate limiter tiers backed by a shared counter store cover attempts
//! from one address, consecutive failures against one account from one
//! address, and distributed failures against one account.

pub mod config;
pub mod error;
pub mod grpc;
pub mod guard;
pub mod ratelimit;
