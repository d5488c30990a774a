use std::time::Duration;

use envconfig::Envconfig;
use lifecycle::config::{millis, Namespaced};

#[derive(Envconfig, Clone, Debug, PartialEq, Eq)]
pub struct HttpConfig {
    #[envconfig(default = "5000")]
    pub read_timeout_ms: u64,

    #[envconfig(default = "10000")]
    pub write_timeout_ms: u64,

    #[envconfig(default = "120000")]
    pub idle_timeout_ms: u64,

    #[envconfig(default = "20000")]
    pub shutdown_timeout_ms: u64,

    #[envconfig(default = "0.0.0.0:3000")]
    pub api_host: String,

    #[envconfig(default = "0.0.0.0:2112")]
    pub metrics_host: String,

    /// Comma separated; `*` allows any origin.
    #[envconfig(default = "*")]
    pub cors_allowed_origins: String,

    /// 0 keeps the server's default limit. Values below 8192 are raised to
    /// 8192, the smallest read buffer the HTTP/1 connection accepts.
    #[envconfig(default = "0")]
    pub max_header_bytes: usize,

    #[envconfig(default = "dev")]
    pub build: String,

    #[envconfig(default = "example server")]
    pub desc: String,

    /// Metrics namespace; `load_config` falls back to the environment prefix.
    pub namespace: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5000,
            write_timeout_ms: 10000,
            idle_timeout_ms: 120000,
            shutdown_timeout_ms: 20000,
            api_host: "0.0.0.0:3000".to_string(),
            metrics_host: "0.0.0.0:2112".to_string(),
            cors_allowed_origins: "*".to_string(),
            max_header_bytes: 0,
            build: "dev".to_string(),
            desc: "example server".to_string(),
            namespace: None,
        }
    }
}

impl HttpConfig {
    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        millis(self.idle_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn cors_allowed_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }
}

impl Namespaced for HttpConfig {
    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn set_namespace(&mut self, namespace: String) {
        self.namespace = Some(namespace);
    }
}
