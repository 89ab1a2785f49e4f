//! Shared state handed to every connection task.

use std::sync::Arc;

use relay_auth::TokenAuthenticator;

use crate::hooks::HookSet;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::Broadcaster;

/// Everything a connection task needs, cheap to clone.
#[derive(Clone)]
pub struct RelayContext {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over `registry`.
    pub broadcaster: Broadcaster,
    /// Token verification for the upgrade gate.
    pub authenticator: Arc<TokenAuthenticator>,
    /// Message hooks and handler.
    pub(crate) hooks: Arc<HookSet>,
    /// Shutdown state.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
}
