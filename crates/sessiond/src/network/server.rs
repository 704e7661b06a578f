//! HTTP and WebSocket server.
//!
//! A single `/ws/pty` endpoint carries session control and output for every
//! connected browser. Requests that expect a reply carry a `reqId`, echoed
//! back in the reply. Session output is broadcast to all clients.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, ServerMessage};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::auth::require_token;
use super::broadcast::{BroadcastFanout, ClientId};
use crate::config::Config;
use crate::resolver::Resolver;
use crate::session::{RegistryOptions, SessionRegistry, SpawnedSession};

/// Path of the session WebSocket.
pub const WS_PATH: &str = "/ws/pty";

/// State shared by every connection.
pub struct ServerState {
    pub registry: Arc<SessionRegistry>,
    pub clients: Arc<BroadcastFanout>,
    /// Required bearer token; `None` leaves the server open.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}

impl ServerState {
    /// Builds the network registry and client set from configuration.
    pub fn new(config: &Config, resolver: Arc<Resolver>, shutdown: CancellationToken) -> Self {
        let clients = Arc::new(BroadcastFanout::new());
        let registry = SessionRegistry::new(
            RegistryOptions::network(&config.session),
            resolver,
            clients.clone(),
        );
        Self::with_registry(
            Arc::new(registry),
            clients,
            config.server.auth_token.clone(),
            shutdown,
        )
    }

    /// Uses an existing registry, which must fan out through `clients`.
    pub fn with_registry(
        registry: Arc<SessionRegistry>,
        clients: Arc<BroadcastFanout>,
        auth_token: Option<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            clients,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            shutdown,
        }
    }
}

/// Builds the application router.
pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .fallback(api_not_found);

    Router::new()
        .route(WS_PATH, get(ws_handler))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ))
        .with_state(state)
}

/// Serves until `state.shutdown` fires, then kills remaining sessions.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    if state.auth_token.is_none() {
        tracing::warn!("No auth token configured, API and WebSocket are open to anyone who can connect");
    }
    tracing::info!(addr = ?addr, "Server listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    state.registry.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn api_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not Found" }))).into_response()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (client_id, mut outbound) = state.clients.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let frame = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        };

        match ClientMessage::from_json(text.as_str()) {
            Ok(message) => handle_client_message(&state, client_id, message).await,
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "Ignoring malformed message");
            }
        }
    }

    state.clients.unregister(&client_id);
    send_task.abort();
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

/// Applies one client request to the registry.
async fn handle_client_message(state: &ServerState, client_id: ClientId, message: ClientMessage) {
    match message {
        ClientMessage::Spawn { options, req_id } => {
            // Spawning may probe the login shell, which blocks for seconds.
            let registry = Arc::clone(&state.registry);
            let result = tokio::task::spawn_blocking(move || registry.spawn(options)).await;

            match result {
                Ok(Ok(SpawnedSession { id, pid, pump })) => {
                    state
                        .clients
                        .send_to(&client_id, ServerMessage::SpawnSuccess { req_id, id, pid });
                    pump.start();
                }
                Ok(Err(e)) => {
                    state.clients.send_to(
                        &client_id,
                        ServerMessage::SpawnError {
                            req_id,
                            error: e.to_string(),
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(client_id = %client_id, error = %e, "Spawn task failed");
                    state.clients.send_to(
                        &client_id,
                        ServerMessage::SpawnError {
                            req_id,
                            error: format!("spawn task failed: {}", e),
                        },
                    );
                }
            }
        }
        ClientMessage::Write { id, data } => state.registry.write(&id, &data),
        ClientMessage::Resize { id, cols, rows } => state.registry.resize(&id, cols, rows),
        ClientMessage::Kill { id } => {
            state.registry.kill(&id);
        }
        ClientMessage::ListSessions { req_id } => {
            state.clients.send_to(
                &client_id,
                ServerMessage::ListSessionsSuccess {
                    req_id,
                    sessions: state.registry.list(),
                },
            );
        }
    }
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn run(config: &Config, resolver: Arc<Resolver>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(ServerState::new(config, resolver, shutdown.clone()));

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
        shutdown.cancel();
    });

    serve(listener, state).await.context("Server error")
}
