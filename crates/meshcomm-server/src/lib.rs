//! # meshcomm-server
//!
//! HTTP surface for a MeshComm node. Provides:
//!
//! - the message list/send endpoints the web UI polls (`/messages`, `/send`)
//!   and their `/api/v1` equivalents
//! - a Server-Sent Events stream of newly accepted messages
//! - a health check backed by the dispatch loop states
//! - static serving of the built single-page web UI

mod api;

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use meshcomm_config::schema::ServerConfig;
use meshcomm_core::{MeshCommError, Message, Result};
use meshcomm_mesh::MeshNetwork;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Messages buffered per SSE client before it starts lagging.
const FEED_CAPACITY: usize = 256;

/// Shared server state.
pub struct AppState {
    pub network: Arc<MeshNetwork>,
    /// Every accepted message, fanned out to the SSE clients.
    pub feed: broadcast::Sender<Message>,
}

/// Build the Axum router.
///
/// Registers an observer on `network` that forwards every accepted message to
/// the SSE feed.
pub fn build_router(config: ServerConfig, network: Arc<MeshNetwork>) -> Router {
    let (feed, _) = broadcast::channel(FEED_CAPACITY);
    {
        let feed = feed.clone();
        network.on_message(move |message| {
            // No subscribers is fine.
            let _ = feed.send(message.clone());
        });
    }

    let state = Arc::new(AppState {
        network,
        feed,
    });

    let mut router = Router::new()
        .route("/health", get(api::health))
        // Paths the web UI uses.
        .route("/messages", get(api::list_messages))
        .route("/send", post(api::send_message))
        .route(
            "/api/v1/messages",
            get(api::list_messages).post(api::send_message),
        )
        .route("/api/v1/node", get(api::node_info))
        .route("/api/v1/stream", get(api::stream_messages));

    if config.web_ui {
        router = with_web_ui(router, &config.static_dir);
    }

    let mut router = router
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

/// Serve the built frontend with a single-page-app fallback to `index.html`,
/// or explain that it has not been built.
fn with_web_ui(router: Router<Arc<AppState>>, dir: &Path) -> Router<Arc<AppState>> {
    let index = dir.join("index.html");
    if index.is_file() {
        info!(path = %dir.display(), "serving web UI");
        router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
    } else {
        warn!(path = %dir.display(), "web UI not found, static files disabled");
        router.fallback(frontend_not_built)
    }
}

async fn frontend_not_built() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        "frontend not built - run 'npm run build' in frontend",
    )
}

/// Start the HTTP server and run it until `shutdown` is cancelled.
pub async fn start_server(
    config: ServerConfig,
    network: Arc<MeshNetwork>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listen = config.listen.clone();
    let router = build_router(config, network);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .map_err(|e| MeshCommError::Transport(format!("failed to bind {listen}: {e}")))?;
    info!(listen = %listen, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| MeshCommError::Transport(format!("server error: {e}")))?;

    info!("HTTP server stopped");
    Ok(())
}
