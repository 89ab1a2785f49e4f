//! Caller-supplied extension points.
//!
//! - **Route setup**: mounts extra HTTP routes on the router before serving.
//! - **Pre/post broadcast hooks**: run around the default fan-out.
//! - **Message handler**: when present, replaces the pre-hook → broadcast →
//!   post-hook sequence entirely for every message.
//!
//! Presence is checked per message, and the broadcast hooks can be swapped
//! at runtime with `RelayServer::set_lifecycle_hooks`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use parking_lot::RwLock;
use relay_core::RelayMessage;
use serde::Serialize;

use crate::errors::RelayError;
use crate::websocket::broadcast::{BroadcastReport, Broadcaster};
use crate::websocket::connection::Connection;

/// Error returned by a hook or handler.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A failure described by a message.
    #[error("{0}")]
    Failed(String),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    /// Create a hook error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<RelayError> for HookError {
    fn from(err: RelayError) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Callback run before or after the default broadcast.
#[async_trait]
pub trait BroadcastHook: Send + Sync {
    /// Observe a message. Returning an error aborts the rest of the
    /// sequence for this message.
    async fn call(&self, message: &RelayMessage, sender: &Connection) -> Result<(), HookError>;
}

#[async_trait]
impl<F> BroadcastHook for F
where
    F: Fn(&RelayMessage, &Connection) -> Result<(), HookError> + Send + Sync,
{
    async fn call(&self, message: &RelayMessage, sender: &Connection) -> Result<(), HookError> {
        self(message, sender)
    }
}

/// Replacement for the default broadcast pipeline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message whose sender has already been stamped. The handler
    /// is responsible for any delivery.
    async fn handle(&self, message: RelayMessage, ctx: HandlerContext) -> Result<(), HookError>;
}

/// What a [`MessageHandler`] can reach.
pub struct HandlerContext {
    connection: Arc<Connection>,
    broadcaster: Broadcaster,
}

impl HandlerContext {
    pub(crate) fn new(connection: Arc<Connection>, broadcaster: Broadcaster) -> Self {
        Self {
            connection,
            broadcaster,
        }
    }

    /// The sending connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Identity of the sending connection.
    pub fn identity(&self) -> &str {
        self.connection.identity()
    }

    /// Send a JSON value back to the sender only.
    pub fn reply<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        self.connection.send_json(value)
    }

    /// Fan a message out to every open connection.
    pub async fn broadcast(&self, message: &RelayMessage) -> Result<BroadcastReport, RelayError> {
        self.broadcaster.broadcast(message).await
    }
}

/// Adds routes to the HTTP router.
pub type RouteSetup = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Extension points supplied at construction.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Extra HTTP routes.
    pub route_setup: Option<RouteSetup>,
    /// Runs before the default broadcast.
    pub pre_broadcast: Option<Arc<dyn BroadcastHook>>,
    /// Runs after the default broadcast.
    pub post_broadcast: Option<Arc<dyn BroadcastHook>>,
    /// Replaces the default pipeline when present.
    pub handler: Option<Arc<dyn MessageHandler>>,
}

impl Hooks {
    /// Set the route setup callback.
    #[must_use]
    pub fn with_routes(mut self, setup: impl Fn(Router) -> Router + Send + Sync + 'static) -> Self {
        self.route_setup = Some(Arc::new(setup));
        self
    }

    /// Set the pre-broadcast hook.
    #[must_use]
    pub fn with_pre_broadcast(mut self, hook: impl BroadcastHook + 'static) -> Self {
        self.pre_broadcast = Some(Arc::new(hook));
        self
    }

    /// Set the post-broadcast hook.
    #[must_use]
    pub fn with_post_broadcast(mut self, hook: impl BroadcastHook + 'static) -> Self {
        self.post_broadcast = Some(Arc::new(hook));
        self
    }

    /// Set the custom message handler.
    #[must_use]
    pub fn with_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("route_setup", &self.route_setup.is_some())
            .field("pre_broadcast", &self.pre_broadcast.is_some())
            .field("post_broadcast", &self.post_broadcast.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Runtime view of the message hooks.
#[derive(Default)]
pub(crate) struct HookSet {
    lifecycle: RwLock<(Option<Arc<dyn BroadcastHook>>, Option<Arc<dyn BroadcastHook>>)>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl HookSet {
    pub(crate) fn new(hooks: &Hooks) -> Self {
        Self {
            lifecycle: RwLock::new((hooks.pre_broadcast.clone(), hooks.post_broadcast.clone())),
            handler: hooks.handler.clone(),
        }
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn MessageHandler>> {
        self.handler.clone()
    }

    pub(crate) fn pre_broadcast(&self) -> Option<Arc<dyn BroadcastHook>> {
        self.lifecycle.read().0.clone()
    }

    pub(crate) fn post_broadcast(&self) -> Option<Arc<dyn BroadcastHook>> {
        self.lifecycle.read().1.clone()
    }

    pub(crate) fn set_lifecycle(
        &self,
        pre: Option<Arc<dyn BroadcastHook>>,
        post: Option<Arc<dyn BroadcastHook>>,
    ) {
        *self.lifecycle.write() = (pre, post);
    }
}
