use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lunar::server::api::ApiServer;
use lunar::server::config::ServerConfig;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lunar=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = config.port, "configuration loaded");

    let api_server = ApiServer::new(config);

    let cleanup_cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn(lunar::server::background::run(
        api_server.state.clone(),
        cleanup_cancel.clone(),
    ));

    let result = api_server.start_server().await;
    cleanup_cancel.cancel();
    result
}
