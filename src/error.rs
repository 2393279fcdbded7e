//! Error types for the Loginguard service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Loginguard operations.
///
/// Throttling is never an error: a tier running out of points is reported
/// through `ConsumeOutcome::Exhausted` and mapped to a verdict.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store failures (unreachable, timed out, malformed reply)
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Credential verification collaborator failures
    #[error("Credential verifier error: {0}")]
    Verifier(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Loginguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
