use common_metrics::MetricsRegistry;
use grpc_server::{new_server, GrpcConfig, GrpcOptions, RoutesBuilder};
use lifecycle::config::load_config;
use lifecycle::ServerError;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod greeter;

use greeter::helloworld::greeter_server::GreeterServer;
use greeter::helloworld::FILE_DESCRIPTOR_SET;
use greeter::GreeterService;

fn register(routes: &mut RoutesBuilder) {
    routes.add_service(GreeterServer::new(GreeterService));
    info!(service = "Greeter", "registering services");
}

// Publishes the Greeter schema through reflection.
fn options() -> GrpcOptions {
    GrpcOptions::default().with_file_descriptor_set(FILE_DESCRIPTOR_SET)
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

    // TEST_API_HOST, TEST_NAME, ...
    let config: GrpcConfig = load_config("test").inspect_err(|e| {
        error!(error = %e, "config loading failed");
    })?;

    let registry = MetricsRegistry::new();
    let server = new_server(
        CancellationToken::new(),
        &config,
        register,
        &registry,
        options(),
    )
    .inspect_err(|e| error!(error = %e, "server instantiation failed"))?;

    server
        .run()
        .await
        .inspect_err(|e| error!(error = %e, "server startup failed"))
}
