//! Login throttle service implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::proto::loginguard::v1::{
    login_throttle_server::LoginThrottle, Attempt, CheckRequest, CheckResponse, Decision,
    LoginStatus, ReportRequest, ReportResponse, UnblockRequest, UnblockResponse,
};

use crate::error::GuardError;
use crate::guard::{FailureOutcome, LoginAttempt, LoginGuard, Verdict};

/// Implementation of the `LoginThrottle` gRPC interface.
pub struct LoginThrottleService {
    /// The guard instance
    guard: Arc<LoginGuard>,
}

impl LoginThrottleService {
    /// Create a new LoginThrottleService around a guard.
    pub fn new(guard: Arc<LoginGuard>) -> Self {
        Self { guard }
    }
}

/// Validate the wire attempt. The connection peer stands in for a missing
/// source address.
fn attempt_from(attempt: Option<Attempt>, peer: Option<SocketAddr>) -> Result<LoginAttempt, Status> {
    let Some(attempt) = attempt else {
        warn!("Received request without an attempt");
        return Err(Status::invalid_argument("attempt is required"));
    };

    if attempt.account.trim().is_empty() {
        warn!("Received attempt with empty account");
        return Err(Status::invalid_argument("account is required"));
    }

    let address = if attempt.source_address.trim().is_empty() {
        match peer {
            Some(peer) => peer.ip().to_string(),
            None => {
                warn!("Received attempt without a source address");
                return Err(Status::invalid_argument("source_address is required"));
            }
        }
    } else {
        attempt.source_address
    };

    let login_attempt = LoginAttempt::new(attempt.account, address);
    Ok(match attempt.device_token {
        Some(token) => login_attempt.with_device_token(token),
        None => login_attempt,
    })
}

/// Log the cause and return a status that does not reveal it.
fn internal(error: GuardError) -> Status {
    error!(error = %error, "Login throttling failed");
    Status::internal("internal error")
}

#[tonic::async_trait]
impl LoginThrottle for LoginThrottleService {
    /// Decide whether credential verification may run.
    #[instrument(skip(self, request), fields(attempt_id = %Uuid::new_v4()))]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let peer = request.remote_addr();
        let attempt = attempt_from(request.into_inner().attempt, peer)?;

        let verdict = self.guard.check(&attempt).await.map_err(internal)?;

        let response = match verdict {
            Verdict::Proceed => CheckResponse {
                decision: Decision::Proceed.into(),
                retry_after_seconds: None,
            },
            Verdict::Deny(denial) => CheckResponse {
                decision: Decision::TooManyRequests.into(),
                retry_after_seconds: denial.retry_after_secs(),
            },
        };

        debug!(attempt = %attempt, verdict = ?verdict, "Check decision made");
        Ok(Response::new(response))
    }

    /// Record the outcome of credential verification.
    #[instrument(skip(self, request), fields(attempt_id = %Uuid::new_v4()))]
    async fn report(
        &self,
        request: Request<ReportRequest>,
    ) -> Result<Response<ReportResponse>, Status> {
        let peer = request.remote_addr();
        let req = request.into_inner();
        let attempt = attempt_from(req.attempt, peer)?;

        let response = if req.authenticated {
            self.guard
                .record_success(&attempt)
                .await
                .map_err(internal)?;
            ReportResponse {
                status: LoginStatus::Authorized.into(),
                retry_after_seconds: None,
            }
        } else {
            match self
                .guard
                .record_failure(&attempt, req.account_exists)
                .await
                .map_err(internal)?
            {
                FailureOutcome::Recorded => ReportResponse {
                    status: LoginStatus::BadCredentials.into(),
                    retry_after_seconds: None,
                },
                FailureOutcome::Throttled(denial) => ReportResponse {
                    status: LoginStatus::TooManyRequests.into(),
                    retry_after_seconds: denial.retry_after_secs(),
                },
            }
        };

        debug!(
            attempt = %attempt,
            authenticated = req.authenticated,
            status = ?response.status(),
            "Outcome recorded"
        );
        Ok(Response::new(response))
    }

    /// Lift account-scoped blocks.
    #[instrument(skip(self, request))]
    async fn unblock(
        &self,
        request: Request<UnblockRequest>,
    ) -> Result<Response<UnblockResponse>, Status> {
        let req = request.into_inner();
        if req.account.trim().is_empty() || req.source_address.trim().is_empty() {
            return Err(Status::invalid_argument(
                "account and source_address are required",
            ));
        }

        self.guard
            .unblock(&req.account, &req.source_address)
            .await
            .map_err(internal)?;

        info!(account = %req.account, "Unblock request served");
        Ok(Response::new(UnblockResponse {}))
    }
}
