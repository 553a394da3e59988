//! `BridgeServer`: Axum HTTP + WebSocket front-end listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use v8bridge_core::SessionId;
use v8bridge_settings::{BridgeSettings, SessionPolicy};

use crate::debuggee::DebuggeeHandle;
use crate::health::{self, HealthResponse};
use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{self, SessionContext};

/// Where sessions get their debuggee connection.
#[derive(Clone, Debug)]
pub enum DebuggeeSource {
    /// One connection shared by successive sessions.
    Shared(DebuggeeHandle),
    /// A fresh connection per session.
    PerSession,
}

impl DebuggeeSource {
    fn for_session(&self, settings: &BridgeSettings) -> DebuggeeHandle {
        match self {
            Self::Shared(handle) => handle.clone(),
            Self::PerSession => {
                DebuggeeHandle::spawn(settings.debuggee.clone(), settings.process.clone())
            }
        }
    }

    fn shared(&self) -> Option<&DebuggeeHandle> {
        match self {
            Self::Shared(handle) => Some(handle),
            Self::PerSession => None,
        }
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective settings.
    pub settings: Arc<BridgeSettings>,
    /// Connected front-ends.
    pub registry: Arc<SessionRegistry>,
    /// Debuggee connection source for new sessions.
    pub debuggees: DebuggeeSource,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The bridge server.
pub struct BridgeServer {
    state: AppState,
}

impl BridgeServer {
    /// Create a server. Under the exclusive policy this starts the shared
    /// debuggee actor, so it must be called inside a Tokio runtime.
    pub fn new(settings: BridgeSettings) -> Self {
        let debuggees = match settings.server.policy {
            SessionPolicy::Exclusive => DebuggeeSource::Shared(DebuggeeHandle::spawn(
                settings.debuggee.clone(),
                settings.process.clone(),
            )),
            SessionPolicy::PerSession => DebuggeeSource::PerSession,
        };
        let registry = Arc::new(SessionRegistry::new(settings.server.shutdown_timeout()));
        Self {
            state: AppState {
                settings: Arc::new(settings),
                registry,
                debuggees,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve in a background task until shutdown fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.settings.server.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(
            %addr,
            policy = ?self.state.settings.server.policy,
            debugger = %self.state.settings.debuggee.addr(),
            "bridge listening"
        );

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Close every debuggee connection, killing any managed runtimes.
    pub async fn close_debuggees(&self) {
        if let Some(shared) = self.state.debuggees.shared() {
            shared.close().await;
        }
        for handle in self.state.registry.debuggees() {
            handle.close().await;
        }
    }

    /// The shared debuggee connection, under the exclusive policy.
    pub fn shared_debuggee(&self) -> Option<&DebuggeeHandle> {
        self.state.debuggees.shared()
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Effective settings.
    pub fn settings(&self) -> &BridgeSettings {
        &self.state.settings
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = SessionId::new();
    let debuggee = state.debuggees.for_session(&state.settings);
    let exclusive = state.settings.server.policy == SessionPolicy::Exclusive;
    let lease = state
        .registry
        .admit(&session_id, debuggee.clone(), &state.shutdown.token(), exclusive)
        .await;

    let ctx = SessionContext {
        session_id,
        debuggee,
        lease,
        registry: Arc::clone(&state.registry),
    };
    session::run_session(socket, ctx, &state.settings.server).await;
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let shared = state.debuggees.shared().map(DebuggeeHandle::status);
    Json(health::health_check(
        state.start_time,
        state.settings.server.policy,
        shared,
        state.registry.snapshot(),
    ))
}
