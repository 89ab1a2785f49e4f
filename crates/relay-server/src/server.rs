//! `RelayServer`: axum HTTP server with a `WebSocket` relay endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::{Json, Response};
use axum::routing::get;
use parking_lot::Mutex;
use relay_auth::TokenAuthenticator;
use relay_core::RelayMessage;
use relay_settings::TransportSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::context::RelayContext;
use crate::errors::RelayError;
use crate::health::{self, HealthResponse};
use crate::hooks::{BroadcastHook, HookSet, Hooks, RouteSetup};
use crate::registry::ConnectionRegistry;
use crate::shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator};
use crate::websocket::broadcast::{BroadcastReport, Broadcaster};
use crate::websocket::gate::{self, GateDecision, UpgradeGate};
use crate::websocket::session::run_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection task context.
    pub ctx: RelayContext,
    /// Upgrade gate.
    pub gate: UpgradeGate,
    /// Transport options applied to each upgrade.
    pub transport: TransportSettings,
    /// When the server was constructed.
    pub start_time: Instant,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    route_setup: Option<RouteSetup>,
    ctx: RelayContext,
    gate: UpgradeGate,
    start_time: Instant,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    serve_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl RelayServer {
    /// Build a server from its configuration and extension points.
    pub fn new(config: ServerConfig, hooks: Hooks) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let authenticator = Arc::new(TokenAuthenticator::new(
            &config.secret_key,
            config.token_expiry,
        ));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let ctx = RelayContext {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            authenticator: authenticator.clone(),
            hooks: Arc::new(HookSet::new(&hooks)),
            shutdown: shutdown.clone(),
            outbound_queue: config.transport.outbound_queue,
        };
        Self {
            gate: UpgradeGate::new(authenticator, shutdown),
            route_setup: hooks.route_setup,
            ctx,
            config,
            start_time: Instant::now(),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            serve_task: Mutex::new(None),
        }
    }

    /// Build the axum router: `/health`, the upgrade route, and any routes
    /// added by the route-setup hook.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            gate: self.gate.clone(),
            transport: self.config.transport.clone(),
            start_time: self.start_time,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route(&ws_path(&self.config.transport.path), get(ws_handler))
            .with_state(state);
        if let Some(setup) = &self.route_setup {
            router = setup(router);
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Returns the bound address (useful with port `0`).
    pub async fn start(&self) -> Result<SocketAddr, RelayError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RelayError::AlreadyStarted);
        }
        let listener = match TcpListener::bind((self.config.host.as_str(), self.config.port)).await {
            Ok(listener) => listener,
            Err(err) => {
                self.started.store(false, Ordering::Release);
                return Err(err.into());
            }
        };
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.ctx.shutdown.token();

        let serve = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        *self.serve_task.lock() = Some(serve);
        *self.local_addr.lock() = Some(addr);

        info!(%addr, path = %ws_path(&self.config.transport.path), "relay server listening");
        Ok(addr)
    }

    /// Close every connection with 1001, stop accepting, and wait for
    /// connection tasks to finish. Calling it again is a no-op.
    pub async fn stop(&self) -> Result<(), RelayError> {
        let shutdown = &self.ctx.shutdown;
        if !shutdown.begin_stop() {
            debug!("stop already requested");
            return Ok(());
        }
        info!("stopping relay server");

        let closed = shutdown.close_all(&self.ctx.registry).await;
        shutdown.cancel();

        let serve = self.serve_task.lock().take();
        let mut result = Ok(());
        if let Some(mut serve) = serve {
            match tokio::time::timeout(DEFAULT_DRAIN_TIMEOUT, &mut serve).await {
                Ok(Ok(served)) => result = served.map_err(RelayError::from),
                Ok(Err(join)) => result = Err(RelayError::from(join)),
                Err(_) => {
                    warn!("acceptor did not stop in time, aborting");
                    serve.abort();
                }
            }
        }

        let drained = shutdown.drain(DEFAULT_DRAIN_TIMEOUT).await;
        info!(closed, drained, "relay server stopped");
        result
    }

    /// Issue a token bound to `identity` with the configured secret and
    /// expiry.
    pub fn issue_token(&self, identity: &str) -> Result<String, RelayError> {
        Ok(self.ctx.authenticator.issue(identity)?)
    }

    /// Replace both broadcast hooks. Takes effect from the next message.
    pub fn set_lifecycle_hooks(
        &self,
        pre: Option<Arc<dyn BroadcastHook>>,
        post: Option<Arc<dyn BroadcastHook>>,
    ) {
        self.ctx.hooks.set_lifecycle(pre, post);
    }

    /// Send a server-originated message to every open connection.
    pub async fn broadcast(&self, message: &RelayMessage) -> Result<BroadcastReport, RelayError> {
        self.ctx.broadcaster.broadcast(message).await
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.ctx.registry.len().await
    }

    /// Bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn ws_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.ctx.registry.len().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET on the upgrade path: run the gate, then hand the socket to a session
/// or close it.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let decision = state.gate.evaluate(params.get("token").map(String::as_str));
    let tracked = state.ctx.shutdown.tracker().token();
    let ctx = state.ctx;

    apply_transport(ws, &state.transport)
        .on_failed_upgrade(|err: axum::Error| warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let _tracked = tracked;
            match decision {
                GateDecision::Accept { identity } => run_session(socket, identity, ctx).await,
                GateDecision::Reject { .. } => gate::reject(socket).await,
                GateDecision::ShuttingDown => gate::refuse(socket).await,
            }
        })
}

fn apply_transport(mut ws: WebSocketUpgrade, transport: &TransportSettings) -> WebSocketUpgrade {
    if let Some(size) = transport.max_message_size {
        ws = ws.max_message_size(size);
    }
    if let Some(size) = transport.max_frame_size {
        ws = ws.max_frame_size(size);
    }
    if let Some(size) = transport.write_buffer_size {
        ws = ws.write_buffer_size(size);
    }
    ws
}
