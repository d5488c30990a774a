use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ListenerError;

/// Point in time by which shutdown must be done, optionally cut short by a parent token.
#[derive(Clone, Debug)]
pub struct ShutdownDeadline {
    at: Instant,
    parent: Option<CancellationToken>,
}

impl ShutdownDeadline {
    /// A fresh scope of `timeout`, unrelated to whatever triggered the shutdown.
    pub fn fresh(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            parent: None,
        }
    }

    /// `timeout` from now, or sooner if `parent` is cancelled first.
    pub fn within(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            parent: Some(parent.clone()),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.parent.as_ref().is_some_and(|p| p.is_cancelled()) || Instant::now() >= self.at
    }

    /// Resolves once the deadline has passed.
    pub async fn expired(&self) {
        match &self.parent {
            Some(parent) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(self.at) => {}
                    _ = parent.cancelled() => {}
                }
            }
            None => tokio::time::sleep_until(self.at).await,
        }
    }

    /// Runs `fut` until it finishes or the deadline passes, whichever is first.
    pub async fn run<F, T>(&self, name: &str, fut: F) -> Result<T, ListenerError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            out = fut => Ok(out),
            _ = self.expired() => Err(ListenerError::ShutdownTimeout {
                name: name.to_string(),
            }),
        }
    }
}

/// Why the orchestrator left the running state. Its `Display` form is the
/// `signal` field of every shutdown log line.
#[derive(Debug)]
pub enum ShutdownCause {
    ContextCancelled,
    Signal(String),
    ListenerFault {
        listener: String,
        error: ListenerError,
    },
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::ContextCancelled => f.write_str("context_cancelled"),
            ShutdownCause::Signal(name) => f.write_str(name),
            ShutdownCause::ListenerFault { listener, .. } => {
                write!(f, "listener_fault({listener})")
            }
        }
    }
}
