//! WebSocket combat session authority server.
//!
//! Protocol:
//! - One persistent WS connection per client at `/ws/{campaignId}/{combatId}`,
//!   with `playerId`, `isGM` and `entities` query parameters.
//! - Client sends `{ "type": "...", "payload": {...}, "requestId": "..." }`.
//! - Server responds with `{ "type": "...", "payload": {...}, "timestamp": "...",
//!   "requestId": "..." }` events; every mutation is followed by a STATE_SYNC.
//!
//! HTTP surface: `/health`, `/state` (debug snapshot), `/metrics`.

mod config;
mod connection;
mod data_api;
mod registry;
mod session;

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arbiter_store::SessionStore;
use arbiter_types::ids::{CampaignId, CombatId};

use crate::config::ServerConfig;
use crate::connection::{ConnMeta, ConnectParams};
use crate::data_api::DataApi;
use crate::registry::{Registry, SessionHandle};
use crate::session::SessionMsg;

#[derive(Clone)]
struct AppState {
    registry: Registry,
    config: Arc<ServerConfig>,
    metrics: PrometheusHandle,
}

// =============================================================================
// WebSocket handling
// =============================================================================

async fn ws_handler(
    State(app): State<AppState>,
    Path((campaign_id, combat_id)): Path<(String, String)>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let key = (CampaignId::from(campaign_id), CombatId::from(combat_id));
    let handle = match app.registry.get_or_spawn(&key).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "session unavailable");
            return (StatusCode::INTERNAL_SERVER_ERROR, "session unavailable").into_response();
        }
    };

    let connected_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let meta = ConnMeta::from_params(&params, connected_at);
    ws.on_upgrade(move |socket| handle_socket(socket, handle, meta))
}

async fn handle_socket(socket: WebSocket, handle: SessionHandle, meta: ConnMeta) {
    let connection_id = meta.connection_id.clone();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    if handle.tx.send(SessionMsg::Attach { meta, out: out_tx }).is_err() {
        return; // session torn down between upgrade and attach
    }

    let (mut sink, mut stream) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(json) = out_rx.recv().await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        // Session gone: close the transport.
        let _ = sink.close().await;
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(_) => break, // transport error drops the connection silently
        };
        match msg {
            Message::Text(text) => {
                if handle
                    .tx
                    .send(SessionMsg::Inbound {
                        connection_id: connection_id.clone(),
                        text: text.to_string(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {} // ignore binary/ping/pong
        }
    }

    let _ = handle.tx.send(SessionMsg::Detach { connection_id });
    forward.abort();
}

// =============================================================================
// HTTP surface
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateQuery {
    campaign_id: String,
    combat_id: String,
}

/// Full debug snapshot straight from storage (works whether or not the
/// session is currently resident).
async fn state_handler(
    State(app): State<AppState>,
    Query(query): Query<StateQuery>,
) -> Response {
    let db_path = app.config.session_db_path(&query.campaign_id, &query.combat_id);
    if !db_path.exists() {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "unknown session" })))
            .into_response();
    }
    let snapshot = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let store = SessionStore::open(&db_path)?;
        let state = store.load()?;
        let log = store.recent_log(100)?;
        Ok((state, log))
    })
    .await;

    match snapshot {
        Ok(Ok((Some((state, _)), log))) => Json(serde_json::json!({
            "state": arbiter_engine::state_sync::project(&state),
            "log": log,
        }))
        .into_response(),
        Ok(Ok((None, _))) => {
            (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "empty session" })))
                .into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "state snapshot failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "storage" })))
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "state snapshot task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": "internal" })))
                .into_response()
        }
    }
}

async fn metrics_handler(State(app): State<AppState>) -> String {
    app.metrics.render()
}

async fn index() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html><head><title>Arbiter</title></head>
<body>
<h1>Combat Session Authority</h1>
<p>Connect via WebSocket at <code>/ws/{campaignId}/{combatId}</code></p>
<pre>
// Example:
const ws = new WebSocket("ws://localhost:3030/ws/my-campaign/fight-1?playerId=u1&isGM=false");
ws.onmessage = (e) => console.log(JSON.parse(e.data));
ws.onopen = () => ws.send(JSON.stringify({ type: "REQUEST_STATE" }));
</pre>
</body></html>"#,
    )
}

// =============================================================================
// Main
// =============================================================================

fn cors_layer(config: Arc<ServerConfig>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            origin.to_str().map(|o| config.origin_allowed(o)).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::UPGRADE,
            header::CONNECTION,
        ])
        .allow_credentials(true)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(ServerConfig::from_env());
    if let Err(e) = config.ensure_dirs() {
        error!(error = %e, dir = %config.sessions_dir().display(), "cannot create data dir");
        std::process::exit(1);
    }

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs once");

    let data_api = DataApi::new(&config);
    let registry = Registry::new(config.clone(), data_api);
    let app_state = AppState { registry, config: config.clone(), metrics };

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/state", get(state_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws/{campaign_id}/{combat_id}", get(ws_handler))
        .layer(cors_layer(config.clone()))
        .with_state(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!(%addr, error = %e, "failed to bind");
        std::process::exit(1);
    });
    info!(%addr, origins = ?config.allowed_origins, "arbiter-server listening");
    axum::serve(listener, app).await.expect("server runs until killed");
}
