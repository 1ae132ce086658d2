//! SketchRoom relay server binary.

use sketchroom_server::{AppState, DEFAULT_ADDR, app};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sketchroom_server=info,tower_http=info".into()),
        )
        .init();

    let addr = bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("SketchRoom relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app(Arc::new(AppState::new()))).await
}

/// Bind address from `SKETCHROOM_ADDR`, falling back to the default.
fn bind_addr() -> SocketAddr {
    let fallback = || SocketAddr::from(([0, 0, 0, 0], 3030));
    match std::env::var("SKETCHROOM_ADDR") {
        Ok(value) => value.parse().unwrap_or_else(|e| {
            warn!("Ignoring SKETCHROOM_ADDR {:?}: {}", value, e);
            fallback()
        }),
        Err(_) => DEFAULT_ADDR.parse().unwrap_or_else(|_| fallback()),
    }
}
