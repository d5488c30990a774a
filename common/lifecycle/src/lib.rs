//! Server lifecycle: listeners that serve, drain and get force-stopped, and an
//! orchestrator that races them against cancellation and OS signals and then
//! shuts them down in order under one deadline.

pub mod config;
mod deadline;
mod error;
mod http_listener;
mod listener;
mod orchestrator;
pub mod signals;

pub use deadline::{ShutdownCause, ShutdownDeadline};
pub use error::{ConfigError, ListenerError, ServerError};
pub use http_listener::{BoxError, HttpListener};
pub use listener::{Listener, ListenerOptions, ListenerState};
pub use orchestrator::{
    HealthGate, Orchestrator, OrchestratorBuilder, ServerHandle, ServerState,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
