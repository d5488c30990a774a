use std::time::Duration;

use envconfig::Envconfig;
use lifecycle::config::Namespaced;

#[derive(Envconfig, Clone, Debug, PartialEq, Eq)]
pub struct GrpcConfig {
    #[envconfig(default = "20000")]
    pub shutdown_timeout_ms: u64,

    #[envconfig(default = "0.0.0.0:50051")]
    pub api_host: String,

    #[envconfig(default = "0.0.0.0:2112")]
    pub metrics_host: String,

    #[envconfig(default = "dev")]
    pub build: String,

    #[envconfig(default = "example grpc server")]
    pub desc: String,

    #[envconfig(default = "test")]
    pub namespace: String,

    #[envconfig(default = "test")]
    pub version: String,

    /// Service name reported through the health service.
    #[envconfig(default = "test")]
    pub name: String,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 20000,
            api_host: "0.0.0.0:50051".to_string(),
            metrics_host: "0.0.0.0:2112".to_string(),
            build: "dev".to_string(),
            desc: "example grpc server".to_string(),
            namespace: "test".to_string(),
            version: "test".to_string(),
            name: "test".to_string(),
        }
    }
}

impl GrpcConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Namespaced for GrpcConfig {
    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    fn set_namespace(&mut self, namespace: String) {
        self.namespace = namespace;
    }
}
