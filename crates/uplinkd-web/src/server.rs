use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use uplinkd_core::catalog::ConnectionCatalog;
use uplinkd_core::gateway::GatewayBridge;
use uplinkd_core::selector::AutoSelector;
use uplinkd_core::status::StatusBoard;

const MAX_BODY_BYTES: usize = 16 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_CONCURRENCY: usize = 32;

#[derive(Clone)]
pub struct WebState {
    pub catalog: Arc<ConnectionCatalog>,
    pub status: Arc<StatusBoard>,
    pub gateway: Arc<GatewayBridge>,
    pub selector: Arc<AutoSelector>,
}

#[derive(Serialize)]
struct ConnectionView {
    index: usize,
    ssid: String,
    bssid: String,
    radio: String,
    strategy: String,
    signal_strength: u8,
    download_mbps: f64,
    upload_mbps: f64,
    latency_ms: f64,
    connected: bool,
    score: f64,
}

fn connection_views(catalog: &ConnectionCatalog, sort_by_score: bool) -> Vec<ConnectionView> {
    let mut views: Vec<ConnectionView> = catalog
        .snapshot()
        .into_iter()
        .enumerate()
        .map(|(index, c)| ConnectionView {
            index,
            score: c.score(),
            ssid: c.ap.ssid,
            bssid: c.ap.bssid,
            radio: c.radio,
            strategy: c.strategy,
            signal_strength: c.ap.signal_strength,
            download_mbps: c.download_mbps,
            upload_mbps: c.upload_mbps,
            latency_ms: c.latency_ms,
            connected: c.connected,
        })
        .collect();
    if sort_by_score {
        views.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }
    views
}

pub fn build_router(state: WebState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENCY));

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/connections", get(get_connections))
        .route("/api/connections/:index/bind", post(post_bind))
        .route("/api/unbind", post(post_unbind))
        .route("/api/auto_selection", post(post_auto_selection))
        .route("/api/events", get(get_events))
        .with_state(state)
        .layer(middleware)
}

pub async fn run_server(
    listener: std::net::TcpListener,
    app: Router,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    listener
        .set_nonblocking(true)
        .context("setting web listener non-blocking")?;
    let listener =
        tokio::net::TcpListener::from_std(listener).context("converting web listener")?;

    info!("web surface listening on {:?}", listener.local_addr());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await
        .context("running web server")?;

    Ok(())
}

async fn get_status(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.status.snapshot()))
}

#[derive(Deserialize)]
struct ConnectionsQuery {
    sort: Option<String>,
}

async fn get_connections(
    State(state): State<WebState>,
    Query(query): Query<ConnectionsQuery>,
) -> Json<serde_json::Value> {
    let sort_by_score = query.sort.as_deref() == Some("score");
    Json(serde_json::json!(connection_views(
        &state.catalog,
        sort_by_score
    )))
}

async fn post_bind(
    State(state): State<WebState>,
    Path(index): Path<usize>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let connections = state.catalog.snapshot();
    let Some(connection) = connections.get(index).cloned() else {
        return Err((StatusCode::NOT_FOUND, format!("no connection #{index}")));
    };

    let gateway = Arc::clone(&state.gateway);
    let result = tokio::task::spawn_blocking(move || gateway.bind(&connection))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("bind task failed: {e}"),
            )
        })?;

    match result {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

async fn post_unbind(
    State(state): State<WebState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let gateway = Arc::clone(&state.gateway);
    let result = tokio::task::spawn_blocking(move || gateway.unbind())
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("unbind task failed: {e}"),
            )
        })?;

    match result {
        Ok(()) => Ok(Json(serde_json::json!({ "success": true }))),
        Err(e) => Err((StatusCode::BAD_GATEWAY, e.to_string())),
    }
}

#[derive(Deserialize)]
struct AutoSelectionRequest {
    enabled: bool,
}

async fn post_auto_selection(
    State(state): State<WebState>,
    Json(request): Json<AutoSelectionRequest>,
) -> Json<serde_json::Value> {
    state.selector.set_enabled(request.enabled);
    Json(serde_json::json!({ "enabled": state.selector.is_enabled() }))
}

/// Server-sent events: one `update` event whenever the status or catalog
/// revision moves, sampled once a second.
async fn get_events(
    State(state): State<WebState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::unfold((state, 0u64, 0u64), |(state, status_rev, catalog_rev)| async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let new_status_rev = state.status.revision();
            let new_catalog_rev = state.catalog.revision();
            if new_status_rev == status_rev && new_catalog_rev == catalog_rev {
                continue;
            }

            let payload = serde_json::json!({
                "status": state.status.snapshot(),
                "connections": connection_views(&state.catalog, false),
            });
            let event = Event::default()
                .event("update")
                .json_data(&payload)
                .unwrap_or_else(|_| Event::default().event("update").data("{}"));
            return Some((Ok(event), (state, new_status_rev, new_catalog_rev)));
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
