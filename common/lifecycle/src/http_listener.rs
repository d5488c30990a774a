use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::{Request, Response};
use http_body::Body;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::{Service, ServiceExt};
use tracing::{debug, error, warn};

use crate::{Listener, ListenerError, ListenerOptions, ListenerState, ShutdownDeadline};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// hyper refuses smaller read buffers.
const MIN_BUF_SIZE: usize = 8192;

/// A [`Listener`] serving any tower service over HTTP/1 and HTTP/2 (h2c), so axum
/// routers and tonic routes share one accept loop.
///
/// Every accepted connection runs on its own task in a [`TaskTracker`]. Graceful
/// stop closes the accept loop and asks each connection to finish its in-flight
/// requests; force stop drops the connections outright.
pub struct HttpListener<S> {
    name: String,
    address: String,
    service: S,
    options: ListenerOptions,
    socket: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    state: Mutex<ListenerState>,
    // Stop accepting and drain.
    stop: CancellationToken,
    // Drop every connection now.
    kill: CancellationToken,
    // Cancelled once serve() has returned, whatever the reason.
    done: CancellationToken,
    connections: TaskTracker,
}

impl<S> HttpListener<S> {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        service: S,
        options: ListenerOptions,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            service,
            options,
            socket: Mutex::new(None),
            local_addr: OnceLock::new(),
            state: Mutex::new(ListenerState::Unbound),
            stop: CancellationToken::new(),
            kill: CancellationToken::new(),
            done: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Connections currently being served.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    fn transition(&self, next: impl FnOnce(ListenerState) -> ListenerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next(*state);
    }

    fn take_socket(&self) -> Option<TcpListener> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn connection_builder(&self) -> AutoBuilder<TokioExecutor> {
        let mut builder = AutoBuilder::new(TokioExecutor::new());
        if let Some(timeout) = self.options.read_timeout {
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(timeout);
        }
        if let Some(size) = header_buf_size(&self.name, self.options.max_header_bytes) {
            builder.http1().max_buf_size(size);
        }
        builder
    }
}

// None keeps hyper's default.
fn header_buf_size(name: &str, requested: usize) -> Option<usize> {
    match requested {
        0 => None,
        n if n < MIN_BUF_SIZE => {
            warn!(
                server = name,
                requested = n,
                applied = MIN_BUF_SIZE,
                "max header bytes below the minimum read buffer, raising it"
            );
            Some(MIN_BUF_SIZE)
        }
        n => Some(n),
    }
}

#[async_trait]
impl<S, B> Listener for HttpListener<S>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn bind(&self) -> Result<SocketAddr, ListenerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        let bound = match TcpListener::bind(self.address.as_str()).await {
            Ok(socket) => socket.local_addr().map(|addr| (socket, addr)),
            Err(e) => Err(e),
        };
        let (socket, addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.transition(|_| ListenerState::Faulted);
                self.done.cancel();
                return Err(ListenerError::Bind {
                    address: self.address.clone(),
                    source,
                });
            }
        };

        *self.socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(socket);
        _ = self.local_addr.set(addr);
        self.transition(|state| match state {
            ListenerState::Unbound => ListenerState::Serving,
            other => other,
        });
        Ok(addr)
    }

    async fn serve(&self) -> Result<(), ListenerError> {
        let result = self.run().await;
        if let Err(e) = &result {
            self.transition(|_| ListenerState::Faulted);
            error!(server = %self.name, error = %e, "listener faulted");
        }
        self.done.cancel();
        result
    }

    async fn graceful_stop(&self, deadline: &ShutdownDeadline) -> Result<(), ListenerError> {
        self.transition(|state| {
            if state.is_terminal() {
                state
            } else {
                ListenerState::ShuttingDown
            }
        });
        self.stop.cancel();

        deadline.run(&self.name, self.done.cancelled()).await?;

        self.transition(|state| match state {
            ListenerState::ShuttingDown => ListenerState::Stopped,
            other => other,
        });
        Ok(())
    }

    fn force_stop(&self) {
        self.transition(|state| match state {
            ListenerState::Stopped | ListenerState::Faulted => state,
            _ => ListenerState::ForceStopped,
        });
        self.kill.cancel();
        self.stop.cancel();
        // Bound but never served: nothing else would release the port.
        drop(self.take_socket());
    }
}

impl<S, B> HttpListener<S>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    async fn run(&self) -> Result<(), ListenerError> {
        self.bind().await?;
        let Some(socket) = self.take_socket() else {
            return Ok(());
        };

        let result = self.accept_loop(socket).await;
        self.connections.close();
        if result.is_ok() {
            tokio::select! {
                _ = self.connections.wait() => {}
                _ = self.kill.cancelled() => {}
            }
        }
        result
    }

    // Owns the socket, so returning releases the port.
    async fn accept_loop(&self, socket: TcpListener) -> Result<(), ListenerError> {
        let builder = self.connection_builder();

        loop {
            tokio::select! {
                biased;

                _ = self.stop.cancelled() => break,
                result = socket.accept() => match result {
                    Ok((stream, remote_addr)) => self.spawn_connection(&builder, stream, remote_addr),
                    Err(e) if is_connection_error(&e) => {
                        debug!(server = %self.name, error = %e, "failed to accept connection");
                    }
                    Err(source) => {
                        return Err(ListenerError::Accept {
                            address: self.address.clone(),
                            source,
                        })
                    }
                },
            }
        }

        debug!(server = %self.name, "accept loop stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        builder: &AutoBuilder<TokioExecutor>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(server = %self.name, error = %e, "failed to set TCP_NODELAY");
        }

        let activity = Arc::new(Activity::new());
        let service = {
            let service = self.service.clone();
            let activity = activity.clone();
            hyper::service::service_fn(move |req: Request<Incoming>| {
                let service = service.clone();
                let guard = activity.begin();
                async move {
                    let response = service.oneshot(req).await;
                    drop(guard);
                    response
                }
            })
        };

        let conn = builder
            .serve_connection_with_upgrades(TokioIo::new(stream), service)
            .into_owned();

        let name = self.name.clone();
        let stop = self.stop.clone();
        let kill = self.kill.clone();
        let idle_timeout = self.options.idle_timeout;

        self.connections.spawn(async move {
            tokio::pin!(conn);
            let mut draining = false;

            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!(server = %name, remote = %remote_addr, error = %e, "connection closed");
                        }
                        break;
                    }
                    _ = kill.cancelled() => {
                        debug!(server = %name, remote = %remote_addr, "connection severed");
                        break;
                    }
                    _ = stop.cancelled(), if !draining => {
                        conn.as_mut().graceful_shutdown();
                        draining = true;
                    }
                    _ = activity.idle(idle_timeout), if !draining => {
                        debug!(server = %name, remote = %remote_addr, "closing idle connection");
                        conn.as_mut().graceful_shutdown();
                        draining = true;
                    }
                }
            }
        });
    }
}

fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

// Last time a request finished on a connection, plus how many are running now.
struct Activity {
    epoch: Instant,
    last_active_ms: AtomicU64,
    in_flight: AtomicUsize,
}

struct ActivityGuard(Arc<Activity>);

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        ActivityGuard(self.clone())
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Resolves once nothing has run on the connection for `timeout`. Never resolves
    /// without a timeout.
    async fn idle(&self, timeout: Option<Duration>) {
        let Some(timeout) = timeout else {
            return std::future::pending().await;
        };
        loop {
            if self.in_flight.load(Ordering::Acquire) > 0 {
                tokio::time::sleep(timeout).await;
                continue;
            }
            let idle = self.idle_for();
            if idle >= timeout {
                return;
            }
            tokio::time::sleep(timeout - idle).await;
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let now = u64::try_from(self.0.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.0.last_active_ms.store(now, Ordering::Release);
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
