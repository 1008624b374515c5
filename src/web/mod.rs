//! Web layer: route registration and the HTTP server lifecycle.
//!
//! Handlers stay thin and delegate to the provider and relay engine; the
//! published playlist/guide are served straight from the current snapshot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::routing::{get, put};
use axum::Router;
use sysinfo::System;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::proxy::Provider;
use crate::services::RelayManager;

pub mod handlers;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<Provider>,
    pub relay: Arc<RelayManager>,
    pub system: Arc<RwLock<System>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Arc<Config>, provider: Arc<Provider>, relay: Arc<RelayManager>) -> Self {
        Self {
            config,
            provider,
            relay,
            system: Arc::new(RwLock::new(System::new())),
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/iptv-playlist", get(handlers::get_playlist))
        .route("/epg-guide", get(handlers::get_guide))
        .route("/channel/:index", get(handlers::stream_channel))
        .route("/refresh", put(handlers::refresh))
        .route("/debug", get(handlers::debug_info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server wrapper around the router.
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = state
            .config
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen address {}", state.config.listen_address))?;
        Ok(Self {
            app: router(state),
            addr,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until a shutdown signal arrives, then drain with a bounded
    /// grace period driven by client disconnects and relay timeouts.
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;
        axum::serve(
            listener,
            self.app
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::error!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping http server");
}
