// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! WebSocket transport with `/ws`, `/health` and optional static files.
//!
//! Each socket becomes one registry connection. A send task drains the
//! connection's event stream into text frames while the receive loop
//! parses commands and hands them to the registry.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};

use mapscout::protocol::parse_command;
use mapscout::{ConnectionId, ConnectionRegistry, EventBridge};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
}

/// Build the router. With `static_dir`, unmatched paths serve the frontend.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(handle_ws_upgrade))
        .route("/health", get(handle_health));

    let app = match static_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            app.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => app,
    };

    app.layer(cors).with_state(state)
}

/// Serve until `shutdown` resolves, then stop every remaining session.
pub async fn run<F>(
    listener: TcpListener,
    state: AppState,
    static_dir: Option<&Path>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state, static_dir);

    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("shutting down, stopping sessions");
    registry.shutdown().await;
    Ok(())
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.connection_count().await,
        "sessions": state.registry.active_sessions().await,
    }))
}

async fn handle_ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState) {
    let conn = ConnectionId::new();
    let (bridge, mut events) = EventBridge::channel();
    state.registry.register(conn, bridge).await;
    info!(connection = %conn, "client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task: forward session events to this client
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(connection = %conn, error = %e, "WebSocket receive error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match parse_command(&text) {
                Ok(command) => {
                    debug!(connection = %conn, ?command, "command received");
                    if let Err(e) = state.registry.dispatch(conn, command).await {
                        warn!(connection = %conn, error = %e, "command dropped");
                    }
                }
                Err(e) => warn!(connection = %conn, error = %e, "ignoring invalid frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(conn).await;
    send_task.abort();
    info!(connection = %conn, "client disconnected");
}
