use std::sync::Arc;

use common_metrics::{metrics_router, DurationKind, MetricSet, MetricsRegistry};
use http::Request;
use hyper::body::Incoming;
use lifecycle::{
    config::validate_address, HttpListener, ListenerOptions, Orchestrator, ServerError,
};
use tokio_util::sync::CancellationToken;
use tonic::body::BoxBody;
use tonic::service::RoutesBuilder;
use tower::util::MapRequest;
use tower::Layer;
use tracing::info;

use crate::{GrpcConfig, GrpcHealth, RedLayer};

pub const GRPC_LISTENER: &str = "grpc";
pub const METRICS_LISTENER: &str = "metrics";

/// Extra knobs for [`new_server`].
#[derive(Clone, Debug, Default)]
pub struct GrpcOptions {
    file_descriptor_sets: Vec<&'static [u8]>,
}

impl GrpcOptions {
    /// Publishes the caller's services through reflection. The health service is
    /// always published.
    pub fn with_file_descriptor_set(mut self, encoded: &'static [u8]) -> Self {
        self.file_descriptor_sets.push(encoded);
        self
    }
}

/// Builds the gRPC server: the services added by `register`, plus health and
/// reflection, on the gRPC listener, with RED metrics under `{namespace}_grpc_*`
/// and `/metrics` on a separate listener. Nothing is bound until the orchestrator
/// runs.
pub fn new_server<F>(
    cancel: CancellationToken,
    config: &GrpcConfig,
    register: F,
    registry: &MetricsRegistry,
    options: GrpcOptions,
) -> Result<Orchestrator, ServerError>
where
    F: FnOnce(&mut RoutesBuilder),
{
    validate_address(&config.api_host)?;
    validate_address(&config.metrics_host)?;

    let red = MetricSet::new_registered(
        registry,
        &config.namespace,
        "grpc",
        DurationKind::Histogram,
        &["service", "method"],
        &["service", "method"],
    )?;

    let mut reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET);
    for encoded in options.file_descriptor_sets.iter().copied() {
        reflection = reflection.register_encoded_file_descriptor_set(encoded);
    }
    let reflection = reflection
        .build_v1()
        .map_err(|e| ServerError::Reflection(e.to_string()))?;

    let (reporter, health_service) = tonic_health::server::health_reporter();
    let health = Arc::new(GrpcHealth::new(reporter, &config.name));

    let mut routes = RoutesBuilder::default();
    register(&mut routes);
    routes.add_service(health_service);
    routes.add_service(reflection);
    let service = RedLayer::new(red).layer(MapRequest::new(routes.routes(), box_body));

    let grpc = HttpListener::new(
        GRPC_LISTENER,
        &config.api_host,
        service,
        ListenerOptions::default(),
    );
    let metrics = HttpListener::new(
        METRICS_LISTENER,
        &config.metrics_host,
        metrics_router(registry.clone()),
        ListenerOptions::default(),
    );

    info!(
        build = %config.build,
        desc = %config.desc,
        version = %config.version,
        namespace = %config.namespace,
        name = %config.name,
        api_host = %config.api_host,
        metrics_host = %config.metrics_host,
        "grpc server configured"
    );

    Ok(Orchestrator::builder(cancel)
        .with_listener(Arc::new(grpc))
        .with_listener(Arc::new(metrics))
        .with_primary(GRPC_LISTENER)
        .with_health(health)
        .with_shutdown_timeout(config.shutdown_timeout())
        .build())
}

// Routes only accepts boxed bodies.
fn box_body(request: Request<Incoming>) -> Request<BoxBody> {
    request.map(tonic::body::boxed)
}
