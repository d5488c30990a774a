//! HTTP server with RED metrics, a `/health` route and a separate `/metrics`
//! listener, run by the lifecycle orchestrator.

mod config;
mod routes;
mod server;

pub use config::HttpConfig;
pub use routes::{create_router, Routes, HEALTH_PATH};
pub use server::{new_server, MAIN_LISTENER, METRICS_LISTENER};
