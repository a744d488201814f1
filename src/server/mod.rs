//! HTTP/WebSocket surface
//!
//! One route matters: `GET /stream` upgrades to the streaming session after
//! the query-string credentials pass. Authentication failures never reach
//! the WebSocket layer; they are answered with a plain 401.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::broadcast::Hub;
use crate::config::ServerConfig;
use crate::encoder::EncoderSupervisor;
use crate::error::Result;
use crate::keys::KeyStore;
use crate::media::InitCache;
use crate::stats::ServerStats;
use crate::stream::protocol::StreamQuery;
use crate::stream::{self, session, SessionContext};

/// Long-lived worker state shared with every handler
pub struct AppState {
    pub hub: Arc<Hub>,
    pub init_cache: Arc<InitCache>,
    pub supervisor: Arc<EncoderSupervisor>,
    pub keys: RwLock<KeyStore>,
    pub config: ServerConfig,
    pub stats: Arc<ServerStats>,
    pub shutdown: watch::Receiver<bool>,
}

/// Build the worker's router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .with_state(state)
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let access_key = *state.keys.read().expect("key store lock poisoned").access_key();

    match stream::authorize(&query, &access_key, unix_now()) {
        Ok(authed) => {
            let ctx = SessionContext {
                hub: Arc::clone(&state.hub),
                init_cache: Arc::clone(&state.init_cache),
                encoder: state.supervisor.current_config(),
                config: state.config.clone(),
                stats: Arc::clone(&state.stats),
                shutdown: state.shutdown.clone(),
            };
            ws.on_upgrade(move |socket| session::run(socket, ctx, authed))
        }
        Err(e) => {
            state
                .stats
                .auth_failures
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(error = %e, "Stream request rejected");
            (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
        }
    }
}

/// Bind the configured listen address
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Stream server listening");
    Ok(listener)
}

/// Serve until the shutdown future resolves
pub async fn serve<F>(state: Arc<AppState>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Current unix time in whole seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
