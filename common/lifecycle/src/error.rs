//! Error types for listeners, configuration and the orchestrator.

use std::io;

use common_metrics::MetricsError;
use thiserror::Error;

/// Errors produced by a single [`Listener`](crate::Listener).
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The address could not be bound.
    #[error("failed to listen on {address}: {source}")]
    Bind { address: String, source: io::Error },

    /// The accept loop hit a non-transient error.
    #[error("failed to accept connections on {address}: {source}")]
    Accept { address: String, source: io::Error },

    /// Draining did not finish before the shutdown deadline.
    #[error("{name} did not drain before the shutdown deadline")]
    ShutdownTimeout { name: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}: expected host:port")]
    InvalidAddress(String),

    #[error("failed to read environment: {0}")]
    Env(#[from] envconfig::Error),
}

/// Errors returned while building or running an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("failed to register RED metrics: {0}")]
    MetricsRegistration(#[from] MetricsError),

    #[error("failed to build reflection service: {0}")]
    Reflection(String),

    /// A listener failed while serving. This is the terminal error of the run.
    #[error("server error: {0}")]
    ListenerFault(#[source] ListenerError),

    /// The first listener that could not stop gracefully, by name.
    #[error("{name} server could not stop gracefully: {source}")]
    Shutdown { name: String, source: ListenerError },
}

impl ServerError {
    pub fn is_shutdown_timeout(&self) -> bool {
        matches!(
            self,
            ServerError::Shutdown {
                source: ListenerError::ShutdownTimeout { .. },
                ..
            }
        )
    }
}
