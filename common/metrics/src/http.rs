use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};

use crate::{MetricSet, MetricsRegistry};

/// Router for the metrics listener: `GET /metrics` in the Prometheus text format.
pub fn metrics_router(registry: MetricsRegistry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || std::future::ready(registry.render())),
    )
}

/// RED middleware for axum routers, attached with
/// `axum::middleware::from_fn_with_state(metric_set, track_red)`.
///
/// The set is expected to carry `path` and `verb` request labels and a `path`
/// duration label. Any status >= 400 counts as an error keyed by the status code.
pub async fn track_red(State(metrics): State<MetricSet>, req: Request, next: Next) -> Response {
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let verb = req.method().to_string();

    let mut call = metrics.start_call(&[&path, &verb], &[&path]);

    let response = next.run(req).await;

    let status = response.status();
    call.set_outcome(status.as_str(), status.is_client_error() || status.is_server_error());
    call.fin();

    response
}
