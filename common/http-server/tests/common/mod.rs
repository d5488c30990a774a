#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use http_server::HttpConfig;
use lifecycle::{Orchestrator, ServerError, ServerHandle};
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ephemeral ports on loopback, short shutdown timeout.
pub fn test_config(namespace: &str) -> HttpConfig {
    HttpConfig {
        api_host: "127.0.0.1:0".to_string(),
        metrics_host: "127.0.0.1:0".to_string(),
        shutdown_timeout_ms: 2000,
        namespace: Some(namespace.to_string()),
        ..HttpConfig::default()
    }
}

pub struct RunningServer {
    pub handle: ServerHandle,
    pub task: JoinHandle<Result<(), ServerError>>,
    pub main: SocketAddr,
    pub metrics: SocketAddr,
}

impl RunningServer {
    pub async fn start(server: Orchestrator) -> Self {
        let handle = server.handle();
        let task = tokio::spawn(server.run_until(std::future::pending()));
        let running = tokio::time::timeout(TEST_TIMEOUT, handle.running())
            .await
            .expect("server did not start in time");
        assert!(running, "server stopped before it was running");

        Self {
            main: handle.local_addr("main").unwrap(),
            metrics: handle.local_addr("metrics").unwrap(),
            handle,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.main, path)
    }

    pub async fn scrape(&self) -> String {
        reqwest::get(format!("http://{}/metrics", self.metrics))
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }

    pub async fn stop(self) -> Result<(), ServerError> {
        self.handle.shutdown();
        tokio::time::timeout(TEST_TIMEOUT, self.task)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Value of the exposition sample `name{...}` carrying every `(label, value)` pair.
pub fn sample(exposition: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.starts_with(&format!("{name}{{")) || line.starts_with(&format!("{name} ")))
        .find(|line| {
            labels
                .iter()
                .all(|(key, value)| line.contains(&format!("{key}=\"{value}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
