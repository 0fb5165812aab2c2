use boardsync::config::RelayConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env();
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "boardsync relay listening");
    boardsync::relay::serve(listener, config).await.expect("server failed");
}
