//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::loginguard::v1::login_throttle_server::LoginThrottleServer;
use super::service::LoginThrottleService;
use crate::error::{GuardError, Result};
use crate::guard::LoginGuard;

/// gRPC server for the login throttle service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The guard instance
    guard: Arc<LoginGuard>,
}

impl GrpcServer {
    /// Create a new gRPC server around a login guard.
    pub fn new(addr: SocketAddr, guard: Arc<LoginGuard>) -> Self {
        Self { addr, guard }
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = LoginThrottleService::new(self.guard);

        info!(
            addr = %self.addr,
            "Starting gRPC server for LoginThrottle with graceful shutdown"
        );

        Server::builder()
            .add_service(LoginThrottleServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                GuardError::Grpc(e)
            })
    }
}
