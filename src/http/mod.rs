//! MCP over streamable HTTP.
//!
//! One path (default `/mcp`) answers `POST`, `GET` and `DELETE`; sessions
//! are tracked by the `Mcp-Session-Id` header.
//!
//! - [`router`]: per-request dispatch
//! - [`session`]: the session registry
//! - [`transport`]: one session's protocol state and SSE streams
//! - [`event_store`]: resumable event log
//! - [`auth`]: optional bearer token gate

pub mod auth;
pub mod event_store;
pub mod router;
pub mod session;
pub mod transport;

use axum::extract::State;
use axum::http::{header, HeaderName};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::server::McpServerFactory;
use crate::metrics::Metrics;

use auth::{StaticTokenVerifier, TokenVerifier};
use router::AppState;
use session::SessionRegistry;
use transport::MCP_SESSION_ID;

/// Build the HTTP application.
///
/// The bearer gate, when given, covers only the MCP path.
pub fn build_router(
    state: AppState,
    path: &str,
    verifier: Option<Arc<dyn TokenVerifier>>,
) -> Router {
    let mut mcp = Router::new().route(
        path,
        post(router::handle_post)
            .get(router::handle_get)
            .delete(router::handle_delete),
    );
    if let Some(verifier) = verifier {
        mcp = mcp.layer(middleware::from_fn_with_state(verifier, auth::require_bearer));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID)]);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .merge(mcp)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until a shutdown signal.
///
/// On shutdown every session is closed, which ends open streams so the
/// server can drain, and then the backend is shut down.
pub async fn start_server(
    config: &Config,
    factory: McpServerFactory,
    backend: BackendClient,
    metrics: Arc<Metrics>,
) -> Result<()> {
    if !config.path.starts_with('/') {
        return Err(Error::Config(format!(
            "MCP path must start with '/': {}",
            config.path
        )));
    }

    let state = AppState::new(config, factory, backend.clone(), metrics);
    let registry = state.registry.clone();

    let verifier = if config.bearer_tokens.is_empty() {
        None
    } else {
        info!("Bearer authentication enabled ({} token(s))", config.bearer_tokens.len());
        Some(Arc::new(StaticTokenVerifier::new(config.bearer_tokens.clone())) as Arc<dyn TokenVerifier>)
    };
    let app = build_router(state, &config.path, verifier);

    let reaper = config
        .idle_timeout()
        .map(|max_idle| spawn_reaper(registry.clone(), max_idle));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting HTTP server on http://{}{}", addr, config.path);

    let shutdown = {
        let registry = registry.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            registry.close_all();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    registry.close_all();
    if let Err(e) = backend.shutdown().await {
        warn!("Backend shutdown failed: {}", e);
    }
    info!("HTTP server stopped");
    Ok(())
}

/// Periodically close idle sessions.
fn spawn_reaper(registry: SessionRegistry, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
    info!("Closing sessions idle for more than {:?}", max_idle);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let closed = registry.reap_idle(max_idle);
            if closed > 0 {
                debug!(closed, remaining = registry.len(), "Reaped idle sessions");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "sessions": state.registry.len(),
        "backend": state.backend.status(),
    }))
}

/// Prometheus scrape endpoint.
async fn metrics_text(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_active_sessions(state.registry.len() as u64);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}
