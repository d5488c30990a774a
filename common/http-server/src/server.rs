use std::sync::Arc;

use axum::{http::HeaderValue, middleware::from_fn_with_state, Router};
use common_metrics::{metrics_router, track_red, DurationKind, MetricSet, MetricsRegistry};
use lifecycle::{
    config::validate_address, HttpListener, ListenerOptions, Orchestrator, ServerError,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::{create_router, HttpConfig, Routes};

pub const MAIN_LISTENER: &str = "main";
pub const METRICS_LISTENER: &str = "metrics";

/// Builds the HTTP server: the caller's routes plus `/health` on the main
/// listener, `/metrics` on the metrics listener, with RED metrics under
/// `{namespace}_http_*`. Nothing is bound until the orchestrator runs.
pub fn new_server(
    cancel: CancellationToken,
    config: &HttpConfig,
    routes: Routes,
    registry: &MetricsRegistry,
) -> Result<Orchestrator, ServerError> {
    validate_address(&config.api_host)?;
    validate_address(&config.metrics_host)?;

    let namespace = config.namespace_or_empty();
    let red = MetricSet::new_registered(
        registry,
        namespace,
        "http",
        DurationKind::Histogram,
        &["path", "verb"],
        &["path"],
    )?;

    let main = HttpListener::new(
        MAIN_LISTENER,
        &config.api_host,
        main_router(routes, config, red),
        ListenerOptions::default()
            .with_read_timeout(config.read_timeout())
            .with_idle_timeout(config.idle_timeout())
            .with_max_header_bytes(config.max_header_bytes),
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
        namespace,
        api_host = %config.api_host,
        metrics_host = %config.metrics_host,
        "http server configured"
    );

    Ok(Orchestrator::builder(cancel)
        .with_listener(Arc::new(metrics))
        .with_listener(Arc::new(main))
        .with_primary(MAIN_LISTENER)
        .with_shutdown_timeout(config.shutdown_timeout())
        .build())
}

// RED outermost so timeouts and CORS rejections are counted too.
fn main_router(routes: Routes, config: &HttpConfig, red: MetricSet) -> Router {
    let mut router = create_router(routes);
    if let Some(timeout) = config.write_timeout() {
        router = router.layer(TimeoutLayer::new(timeout));
    }
    router
        .layer(cors_layer(&config.cors_allowed_origins()))
        .layer(from_fn_with_state(red, track_red))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
