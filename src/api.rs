use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;

use crate::viewer::signaling::Signaler;

pub(crate) fn app_router(signaler: Arc<Signaler>, static_dir: &Path) -> Router {
    crate::handler::signaling::signaling_router(signaler)
        .fallback_service(ServeDir::new(static_dir))
}

/// Binds before returning so a taken port fails startup.
pub(crate) async fn start_api_server(
    cancel: CancellationToken,
    signaler: Arc<Signaler>,
    listen: SocketAddr,
    static_dir: &Path,
) -> anyhow::Result<JoinHandle<()>> {
    let app = app_router(signaler, static_dir);
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {}", listen))?;
    log::info!(
        "API server listening on {}, serving {}",
        listen,
        static_dir.display()
    );

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(cancel))
            .await
        {
            log::error!("API server stopped: {}", e);
        }
    }))
}

async fn shutdown_signal(cancel: CancellationToken) {
    cancel.cancelled().await;
    log::info!("Shutting down API server...");
}
