//! gRPC surface for callers that verify credentials themselves.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::LoginThrottleService;

// Include the generated protobuf code
pub mod proto {
    pub mod loginguard {
        pub mod v1 {
            tonic::include_proto!("loginguard.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::loginguard::v1::{
    login_throttle_server::LoginThrottleServer, Attempt, CheckRequest, CheckResponse, Decision,
    LoginStatus, ReportRequest, ReportResponse, UnblockRequest, UnblockResponse,
};
