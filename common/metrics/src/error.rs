use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics namespace {0:?}: must match [a-zA-Z_:][a-zA-Z0-9_:]*")]
    InvalidNamespace(String),

    #[error("invalid request type {0:?}: must match [a-zA-Z_:][a-zA-Z0-9_:]*")]
    InvalidRequestType(String),

    #[error("duration metric needs at least one label")]
    MissingLabels,

    #[error("invalid label name {0:?}")]
    InvalidLabel(String),

    #[error("metric {0} is already registered")]
    AlreadyRegistered(String),

    #[error("invalid duration buckets: {0}")]
    InvalidBuckets(#[from] BuildError),
}
