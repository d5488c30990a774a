//! gRPC server with RED metrics, standard health and reflection services and a
//! separate `/metrics` listener, run by the lifecycle orchestrator.

mod config;
mod health;
mod interceptor;
mod method;
mod server;

pub use config::GrpcConfig;
pub use health::{GrpcHealth, HealthStatus};
pub use interceptor::{code_name, RedBody, RedFuture, RedLayer, RedService};
pub use method::{extract_service_method, CallIdentifierError};
pub use server::{new_server, GrpcOptions, GRPC_LISTENER, METRICS_LISTENER};

pub use tonic::service::RoutesBuilder;
