use axum::http::{StatusCode, Uri};
use axum::routing::any;
use common_metrics::MetricsRegistry;
use http_server::{new_server, HttpConfig, Routes};
use lifecycle::config::load_config;
use lifecycle::ServerError;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

async fn my_handler(uri: Uri) -> (StatusCode, String) {
    (
        StatusCode::ACCEPTED,
        format!("Hello from myHandler! You requested: {}", uri.path()),
    )
}

async fn another_handler(uri: Uri) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("Hello from anotherHandler! You requested: {}", uri.path()),
    )
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::registry()
        .with(fmt::layer().json().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // TEST_API_HOST, TEST_METRICS_HOST, ...
    let config: HttpConfig = load_config("test").inspect_err(|e| {
        error!(error = %e, "config loading failed");
    })?;

    let routes = Routes::new()
        .route("/myHandler", any(my_handler))
        .route("/anotherHandler", any(another_handler));

    let registry = MetricsRegistry::new();
    let server = new_server(CancellationToken::new(), &config, routes, &registry)
        .inspect_err(|e| error!(error = %e, "server instantiation failed"))?;

    info!(api_host = %config.api_host, "starting rest demo");
    server
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "server startup failed"))
}
