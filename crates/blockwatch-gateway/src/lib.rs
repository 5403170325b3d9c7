//! HTTP/WebSocket boundary for the blockwatch engine.
//!
//! A thin axum adapter: REST routes translate to core operations, the
//! WebSocket endpoint joins clients to the relay notification topic. All
//! 32-byte hashes and ids cross the wire as display-endian hex; storage
//! order is canonical and the translation happens here.

mod auth;
mod error;
mod routes;
mod types;
mod ws;

pub use auth::AuthState;
pub use error::ApiError;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use blockwatch_engine::WatchEngine;
use blockwatch_primitives::ChainView;
use std::net::SocketAddr;
use std::sync::Arc;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to.
    pub listen_addr: SocketAddr,
    /// API key required on every route; `None` disables authentication.
    pub api_key: Option<String>,
}

/// State shared by all handlers.
pub struct AppState {
    engine: Arc<WatchEngine>,
    chain: Arc<dyn ChainView>,
    auth: AuthState,
}

/// Builds the gateway router over an engine and its chain view.
pub fn router(
    engine: Arc<WatchEngine>,
    chain: Arc<dyn ChainView>,
    api_key: Option<&str>,
) -> Router {
    let state = Arc::new(AppState {
        engine,
        chain,
        auth: AuthState::new(api_key),
    });

    // The WebSocket endpoint authenticates in-band (browsers cannot set
    // headers on the upgrade request), so it sits outside the API-key
    // middleware.
    let api = Router::new()
        .route("/relay", get(routes::info).delete(routes::wipe))
        .route("/relay/latest/:max_id", get(routes::latest_under))
        .route("/relay/rescan", post(routes::rescan))
        .route("/relay/outpoint/:hash/:index", get(routes::get_outpoint))
        .route("/relay/script/:script", get(routes::get_script))
        .route("/relay/request/:id", get(routes::get_request))
        .route(
            "/relay/request",
            get(routes::list_requests)
                .put(routes::put_request)
                .delete(routes::delete_request),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    api.merge(Router::new().route("/ws", get(ws::upgrade)))
        .with_state(state)
}

/// Binds and serves the gateway until the server future completes.
pub async fn serve(
    engine: Arc<WatchEngine>,
    chain: Arc<dyn ChainView>,
    config: GatewayConfig,
) -> std::io::Result<()> {
    let app = router(engine, chain, config.api_key.as_deref());
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "gateway listening");
    axum::serve(listener, app).await
}
