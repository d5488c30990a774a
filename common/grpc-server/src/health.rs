use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use lifecycle::HealthGate;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tracing::debug;

// The whole-server entry in the standard health protocol.
const OVERALL: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

impl From<HealthStatus> for ServingStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Unknown => ServingStatus::Unknown,
            HealthStatus::Serving => ServingStatus::Serving,
            HealthStatus::NotServing => ServingStatus::NotServing,
        }
    }
}

/// Drives the standard gRPC health service for the configured service name and
/// for the overall (`""`) entry, which always move together.
pub struct GrpcHealth {
    reporter: HealthReporter,
    service: String,
    statuses: RwLock<HashMap<String, HealthStatus>>,
}

impl GrpcHealth {
    pub fn new(reporter: HealthReporter, service: impl Into<String>) -> Self {
        Self {
            reporter,
            service: service.into(),
            // The reporter starts the overall entry as serving.
            statuses: RwLock::new(HashMap::from([(OVERALL.to_string(), HealthStatus::Serving)])),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Last status published for `service`, `None` if it was never set.
    pub fn status(&self, service: &str) -> Option<HealthStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service)
            .copied()
    }

    pub async fn set(&self, status: HealthStatus) {
        let mut reporter = self.reporter.clone();
        for service in [self.service.as_str(), OVERALL] {
            reporter
                .set_service_status(service, ServingStatus::from(status))
                .await;
            self.statuses
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(service.to_string(), status);
        }
        debug!(service = %self.service, ?status, "health status updated");
    }
}

#[async_trait]
impl HealthGate for GrpcHealth {
    fn name(&self) -> &str {
        "health"
    }

    async fn set_serving(&self) {
        self.set(HealthStatus::Serving).await;
    }

    async fn set_not_serving(&self) {
        self.set(HealthStatus::NotServing).await;
    }
}
