use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::{ListenerError, ShutdownDeadline};

/// Where a listener is in its life. Moves forward only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Unbound,
    Serving,
    ShuttingDown,
    Stopped,
    ForceStopped,
    Faulted,
}

impl ListenerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ListenerState::Stopped | ListenerState::ForceStopped | ListenerState::Faulted
        )
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerState::Unbound => "unbound",
            ListenerState::Serving => "serving",
            ListenerState::ShuttingDown => "shutting_down",
            ListenerState::Stopped => "stopped",
            ListenerState::ForceStopped => "force_stopped",
            ListenerState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// One network-facing server owned by the orchestrator.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Name used in every log line about this listener (`main`, `grpc`, `metrics`).
    fn name(&self) -> &str;

    /// Configured `host:port`.
    fn address(&self) -> &str;

    /// Bound address, once [`bind`](Listener::bind) succeeded.
    fn local_addr(&self) -> Option<SocketAddr>;

    fn state(&self) -> ListenerState;

    /// Binds the configured address. Calling it again after success is a no-op.
    async fn bind(&self) -> Result<SocketAddr, ListenerError>;

    /// Serves until stopped (`Ok`) or until the listener faults. Binds first when
    /// [`bind`](Listener::bind) has not been called.
    async fn serve(&self) -> Result<(), ListenerError>;

    /// Stops accepting and drains in-flight work, giving up with
    /// [`ListenerError::ShutdownTimeout`] when the deadline passes first.
    async fn graceful_stop(&self, deadline: &ShutdownDeadline) -> Result<(), ListenerError>;

    /// Severs everything right away. Does not wait and may be called any number of times.
    fn force_stop(&self);
}

/// Connection limits of a listener. `None` disables the limit.
#[derive(Clone, Debug, Default)]
pub struct ListenerOptions {
    /// Time allowed to receive a request's headers.
    pub read_timeout: Option<Duration>,
    /// Time a keep-alive connection may sit without a request in flight.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on buffered request head bytes. Zero keeps the server default;
    /// anything below 8192 is raised to 8192.
    pub max_header_bytes: usize,
}

impl ListenerOptions {
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }
}
