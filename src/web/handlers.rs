//! HTTP request handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use sysinfo::{Pid, ProcessesToUpdate};
use tracing::{error, info, warn};

use crate::errors::RelayError;

use super::AppState;

pub async fn ping() -> &'static str {
    "PONG"
}

/// Serve the current rendered playlist as a download.
pub async fn get_playlist(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.provider.snapshot().await;
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=tv_channels.m3u",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        snapshot.playlist.clone(),
    )
}

/// Serve the current rendered guide document.
pub async fn get_guide(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.provider.snapshot().await;
    (
        [(header::CONTENT_TYPE, "application/xml")],
        snapshot.guide.clone(),
    )
}

/// Relay one channel's stream; see the relay engine for the state machine.
pub async fn stream_channel(
    State(state): State<AppState>,
    Path(index): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let Ok(index) = index.parse::<usize>() else {
        warn!(index = %index, "invalid channel index");
        return (StatusCode::BAD_REQUEST, "Invalid channel id").into_response();
    };

    if !state.config.relay.enabled {
        return (StatusCode::NOT_FOUND, "Channel not found").into_response();
    }

    let client_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let relay = std::sync::Arc::clone(&state.relay);
    match relay.stream(&state.provider, index, client_addr).await {
        Ok(response) => response,
        Err(RelayError::MaxStreamsReached) => {
            (StatusCode::TOO_MANY_REQUESTS, "Too many concurrent streams").into_response()
        }
        Err(RelayError::ChannelNotFound { .. }) => {
            warn!(channel = index, "channel not found");
            (StatusCode::NOT_FOUND, "Channel not found").into_response()
        }
        Err(error) => {
            error!(channel = index, %error, "failed to start stream relay");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start stream").into_response()
        }
    }
}

/// Re-run resolution end to end. A failure leaves the published snapshot
/// untouched and reports 500.
pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    info!("refreshing provider");
    match state.provider.refresh().await {
        Ok(()) => (StatusCode::OK, "Provider refreshed successfully"),
        Err(error) => {
            error!("error refreshing provider: {error:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error refreshing provider")
        }
    }
}

/// Process and stream diagnostics.
pub async fn debug_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let (total_memory, used_memory, process_rss, process_virtual, cpus) = {
        let mut system = state.system.write().await;
        system.refresh_memory();
        system.refresh_cpu_all();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let process = system.process(Pid::from_u32(std::process::id()));
        (
            system.total_memory(),
            system.used_memory(),
            process.map(|p| p.memory()).unwrap_or(0),
            process.map(|p| p.virtual_memory()).unwrap_or(0),
            system.cpus().len(),
        )
    };

    let snapshot = state.provider.snapshot().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": humantime::format_duration(
            std::time::Duration::from_secs(state.started_at.elapsed().as_secs())
        )
        .to_string(),
        "system": {
            "memory": {
                "total": total_memory,
                "used": used_memory,
                "processRss": process_rss,
                "processVirtual": process_virtual,
            },
            "cpus": cpus,
        },
        "streams": {
            "active": state.relay.active_sessions(),
            "activeCount": state.relay.active_count(),
            "max": state.relay.max_streams(),
            "total": state.relay.total_streams(),
            "lastRefresh": snapshot.refreshed_at.map(|at| at.to_rfc3339()),
        },
        "channels": snapshot.channels.len(),
    }))
}
