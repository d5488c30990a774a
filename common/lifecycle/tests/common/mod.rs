#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use lifecycle::{
    HealthGate, HttpListener, Listener, ListenerError, ListenerOptions, ListenerState,
    Orchestrator, ServerError, ServerHandle, ShutdownDeadline,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Routers and listeners
// ---------------------------------------------------------------------------

/// `/ok` answers right away, `/sleep/:ms` after a delay, `/block` notifies
/// `entered` and then never finishes in test time.
pub fn test_router(entered: Arc<Notify>) -> Router {
    Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route("/sleep/:ms", get(sleep_handler))
        .route("/block", get(block_handler))
        .with_state(entered)
}

async fn sleep_handler(State(entered): State<Arc<Notify>>, Path(ms): Path<u64>) -> &'static str {
    entered.notify_one();
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slept"
}

async fn block_handler(State(entered): State<Arc<Notify>>) -> &'static str {
    entered.notify_one();
    tokio::time::sleep(Duration::from_secs(600)).await;
    "unreachable"
}

pub fn local_listener(name: &str, router: Router) -> Arc<HttpListener<Router>> {
    Arc::new(HttpListener::new(
        name,
        "127.0.0.1:0",
        router,
        ListenerOptions::default(),
    ))
}

/// Main + metrics pair in the HTTP variant's stop order.
pub fn http_pair(
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    entered: Arc<Notify>,
) -> Orchestrator {
    let metrics = Router::new().route("/metrics", get(|| async { "# no metrics" }));
    Orchestrator::builder(cancel)
        .with_listener(local_listener("metrics", metrics))
        .with_listener(local_listener("main", test_router(entered)))
        .with_primary("main")
        .with_shutdown_timeout(shutdown_timeout)
        .build()
}

pub fn spawn_run(
    server: Orchestrator,
    signal: tokio::sync::oneshot::Receiver<String>,
) -> (ServerHandle, JoinHandle<Result<(), ServerError>>) {
    let handle = server.handle();
    let task = tokio::spawn(server.run_until(async move {
        match signal.await {
            Ok(name) => name,
            Err(_) => std::future::pending().await,
        }
    }));
    (handle, task)
}

pub async fn wait_running(handle: &ServerHandle) {
    let running = tokio::time::timeout(TEST_TIMEOUT, handle.running())
        .await
        .expect("server did not start in time");
    assert!(running, "server stopped before it was running");
}

pub async fn join(task: JoinHandle<Result<(), ServerError>>) -> Result<(), ServerError> {
    tokio::time::timeout(TEST_TIMEOUT, task)
        .await
        .expect("server did not stop in time")
        .expect("server task panicked")
}

pub async fn is_unreachable(addr: SocketAddr) -> bool {
    tokio::net::TcpStream::connect(addr).await.is_err()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

// ---------------------------------------------------------------------------
// Recording fakes
// ---------------------------------------------------------------------------

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Listener that serves nothing and writes every stop call into a journal.
/// With `fail_after` set, serve() faults after that long.
pub struct RecordingListener {
    name: String,
    journal: Journal,
    stopped: CancellationToken,
    fail_after: Option<Duration>,
    state: Mutex<ListenerState>,
}

impl RecordingListener {
    pub fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Self::build(name, journal, None)
    }

    pub fn failing(name: &str, journal: &Journal, after: Duration) -> Arc<Self> {
        Self::build(name, journal, Some(after))
    }

    fn build(name: &str, journal: &Journal, fail_after: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            stopped: CancellationToken::new(),
            fail_after,
            state: Mutex::new(ListenerState::Unbound),
        })
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &str {
        "127.0.0.1:0"
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn state(&self) -> ListenerState {
        *self.state.lock().unwrap()
    }

    async fn bind(&self) -> Result<SocketAddr, ListenerError> {
        *self.state.lock().unwrap() = ListenerState::Serving;
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    async fn serve(&self) -> Result<(), ListenerError> {
        match self.fail_after {
            Some(after) => {
                tokio::time::sleep(after).await;
                *self.state.lock().unwrap() = ListenerState::Faulted;
                self.stopped.cancel();
                Err(ListenerError::Accept {
                    address: "127.0.0.1:0".to_string(),
                    source: std::io::Error::other("accept failed"),
                })
            }
            None => {
                self.stopped.cancelled().await;
                Ok(())
            }
        }
    }

    async fn graceful_stop(&self, _deadline: &ShutdownDeadline) -> Result<(), ListenerError> {
        self.record(format!("stop:{}", self.name));
        self.stopped.cancel();
        let mut state = self.state.lock().unwrap();
        if *state != ListenerState::Faulted {
            *state = ListenerState::Stopped;
        }
        Ok(())
    }

    fn force_stop(&self) {
        self.record(format!("force:{}", self.name));
        self.stopped.cancel();
    }
}

pub struct RecordingHealth {
    journal: Journal,
}

impl RecordingHealth {
    pub fn new(journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
        })
    }
}

#[async_trait]
impl HealthGate for RecordingHealth {
    fn name(&self) -> &str {
        "health"
    }

    async fn set_serving(&self) {
        self.journal.lock().unwrap().push("health:serving".to_string());
    }

    async fn set_not_serving(&self) {
        self.journal
            .lock()
            .unwrap()
            .push("health:not_serving".to_string());
    }
}
