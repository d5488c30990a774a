//! Start, run and stop a group of listeners as one server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    signals, Listener, ListenerError, ListenerState, ServerError, ShutdownCause, ShutdownDeadline,
};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Where the orchestrator is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Faulted,
}

impl ServerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Faulted)
    }
}

/// Health side-channel flipped around the primary listener: serving once it is
/// bound, not serving before anything is drained.
#[async_trait]
pub trait HealthGate: Send + Sync {
    fn name(&self) -> &str;
    async fn set_serving(&self);
    async fn set_not_serving(&self);
}

#[derive(Debug)]
enum ListenerEvent {
    Bound { name: String, addr: SocketAddr },
    Fault { name: String, error: ListenerError },
}

pub struct Orchestrator {
    listeners: Vec<Arc<dyn Listener>>,
    primary: Option<String>,
    health: Option<Arc<dyn HealthGate>>,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
    state: watch::Sender<ServerState>,
}

pub struct OrchestratorBuilder {
    listeners: Vec<Arc<dyn Listener>>,
    primary: Option<String>,
    health: Option<Arc<dyn HealthGate>>,
    shutdown_timeout: Duration,
    cancel: CancellationToken,
}

impl OrchestratorBuilder {
    /// Listeners are stopped in the order they are added.
    pub fn with_listener(mut self, listener: Arc<dyn Listener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The listener whose binding flips the health gate to serving.
    pub fn with_primary(mut self, name: impl Into<String>) -> Self {
        self.primary = Some(name.into());
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthGate>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> Orchestrator {
        let (state, _) = watch::channel(ServerState::Idle);
        Orchestrator {
            listeners: self.listeners,
            primary: self.primary,
            health: self.health,
            shutdown_timeout: self.shutdown_timeout,
            cancel: self.cancel,
            state,
        }
    }
}

/// Read-only view of a running orchestrator, usable from other tasks.
#[derive(Clone)]
pub struct ServerHandle {
    state: watch::Receiver<ServerState>,
    listeners: Vec<Arc<dyn Listener>>,
    cancel: CancellationToken,
}

impl ServerHandle {
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Waits until `predicate` holds and returns the state that satisfied it, or
    /// the last state once the orchestrator is gone.
    pub async fn wait_for(&self, predicate: impl Fn(ServerState) -> bool) -> ServerState {
        let mut state = self.state.clone();
        let result = state.wait_for(|s| predicate(*s)).await.map(|s| *s);
        match result {
            Ok(s) => s,
            Err(_) => *state.borrow(),
        }
    }

    /// True once every listener is bound; false if the server stopped first.
    pub async fn running(&self) -> bool {
        self.wait_for(|s| s == ServerState::Running || s.is_terminal())
            .await
            == ServerState::Running
    }

    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.listener(name).and_then(|l| l.local_addr())
    }

    pub fn listener_state(&self, name: &str) -> Option<ListenerState> {
        self.listener(name).map(|l| l.state())
    }

    /// Same as cancelling the token the orchestrator was built with.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn listener(&self, name: &str) -> Option<&Arc<dyn Listener>> {
        self.listeners.iter().find(|l| l.name() == name)
    }
}

impl Orchestrator {
    pub fn builder(cancel: CancellationToken) -> OrchestratorBuilder {
        OrchestratorBuilder {
            listeners: Vec::new(),
            primary: None,
            health: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            cancel,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: self.state.subscribe(),
            listeners: self.listeners.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Serves until the cancellation token fires, SIGINT/SIGTERM arrives or a
    /// listener fails, then shuts everything down.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(signals::wait_for_shutdown_signal()).await
    }

    /// [`run`](Orchestrator::run) with the OS signal replaced by `signal`, which
    /// resolves with the signal's name.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = String> + Send,
    {
        self.state.send_replace(ServerState::Starting);

        let (events_tx, mut events) = mpsc::channel(self.listeners.len().max(1) * 2);
        let tasks: Vec<JoinHandle<()>> = self
            .listeners
            .iter()
            .map(|listener| tokio::spawn(serve_listener(listener.clone(), events_tx.clone())))
            .collect();
        drop(events_tx);

        tokio::pin!(signal);
        let mut bound = 0;
        let cause = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break ShutdownCause::ContextCancelled,
                name = &mut signal => break ShutdownCause::Signal(name),
                Some(event) = events.recv() => match event {
                    ListenerEvent::Bound { name, addr } => {
                        info!(server = %name, status = "started", address = %addr, "startup");
                        if self.primary.as_deref() == Some(name.as_str()) {
                            if let Some(health) = &self.health {
                                health.set_serving().await;
                            }
                        }
                        bound += 1;
                        if bound == self.listeners.len() {
                            self.state.send_replace(ServerState::Running);
                        }
                    }
                    ListenerEvent::Fault { name, error } => {
                        break ShutdownCause::ListenerFault { listener: name, error };
                    }
                },
            }
        };

        self.state.send_replace(ServerState::ShuttingDown);
        let signal = cause.to_string();
        let deadline = match &cause {
            ShutdownCause::Signal(_) => ShutdownDeadline::within(&self.cancel, self.shutdown_timeout),
            _ => ShutdownDeadline::fresh(self.shutdown_timeout),
        };
        let fault = match cause {
            ShutdownCause::ListenerFault { listener, error } => {
                error!(server = %listener, error = %error, "listener failed, shutting down");
                Some(error)
            }
            _ => None,
        };

        let stopped = self.shutdown(&signal, &deadline).await;

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "listener task panicked");
            }
        }

        let result = match (fault, stopped) {
            (Some(error), stopped) => {
                if let Err(e) = stopped {
                    warn!(error = %e, "shutdown after listener fault was not clean");
                }
                Err(ServerError::ListenerFault(error))
            }
            (None, stopped) => stopped,
        };

        match &result {
            Ok(()) => {
                self.state.send_replace(ServerState::Stopped);
                info!(signal = %signal, "server stopped");
            }
            Err(e) => {
                self.state.send_replace(ServerState::Faulted);
                error!(signal = %signal, error = %e, "server stopped with error");
            }
        }
        result
    }

    // Health first, then every listener in order. All of them are always attempted.
    async fn shutdown(&self, signal: &str, deadline: &ShutdownDeadline) -> Result<(), ServerError> {
        if let Some(health) = &self.health {
            info!(server = health.name(), status = "shutdown started", signal, "shutdown");
            health.set_not_serving().await;
            info!(server = health.name(), status = "shutdown complete", signal, "shutdown");
        }

        let mut first_failure = None;
        for listener in &self.listeners {
            let name = listener.name();
            info!(server = name, status = "shutdown started", signal, "shutdown");

            match listener.graceful_stop(deadline).await {
                Ok(()) => info!(server = name, status = "shutdown complete", signal, "shutdown"),
                Err(source) => {
                    listener.force_stop();
                    warn!(server = name, status = "force stopped", signal, error = %source, "shutdown");
                    if first_failure.is_none() {
                        first_failure = Some(ServerError::Shutdown {
                            name: name.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn serve_listener(listener: Arc<dyn Listener>, events: mpsc::Sender<ListenerEvent>) {
    let name = listener.name().to_string();
    let served = match listener.bind().await {
        Ok(addr) => {
            let bound = ListenerEvent::Bound {
                name: name.clone(),
                addr,
            };
            if events.send(bound).await.is_err() {
                debug!(server = %name, "orchestrator gone, dropping listener event");
            }
            listener.serve().await
        }
        Err(e) => Err(e),
    };

    // At most one bound and one fault event per listener, so this never waits.
    if let Err(error) = served {
        let fault = ListenerEvent::Fault {
            name: name.clone(),
            error,
        };
        if events.send(fault).await.is_err() {
            debug!(server = %name, "orchestrator gone, dropping listener event");
        }
    }
}
