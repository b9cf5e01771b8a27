use axum::{Router, routing::get};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router() -> Router {
    // /health is preferred, /healthz kept for health checks configured the old way
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(addr: SocketAddr) -> anyhow::Result<()> {
    info!("dbaas-operator HTTP listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router()).await?;
    Ok(())
}
