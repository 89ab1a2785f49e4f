//! Upgrade gate: decides whether an upgrade request becomes a connection.
//!
//! A missing or empty token is accepted as the anonymous identity. A token
//! that is present but fails verification is rejected with an error payload
//! and close code 1008; the connection is never registered. Once shutdown
//! has begun every upgrade is refused with 1001.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use relay_auth::{AuthError, TokenAuthenticator};
use relay_core::constants::AUTH_FAILED;
use relay_core::{ANONYMOUS_IDENTITY, ErrorPayload, close_code};
use tracing::{info, warn};

use crate::shutdown::{SHUTDOWN_REASON, ShutdownCoordinator};

/// Close reason sent with 1008.
pub const AUTH_CLOSE_REASON: &str = "Invalid or expired token";

/// Outcome of evaluating an upgrade request.
#[derive(Debug)]
pub enum GateDecision {
    /// Promote to a connection bound to `identity`.
    Accept {
        /// The bound identity.
        identity: String,
    },
    /// The token was present but unusable.
    Reject {
        /// Why verification failed.
        reason: AuthError,
    },
    /// The server is stopping.
    ShuttingDown,
}

/// Evaluates upgrade tokens.
#[derive(Clone)]
pub struct UpgradeGate {
    authenticator: Arc<TokenAuthenticator>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl UpgradeGate {
    /// Create a gate.
    pub fn new(authenticator: Arc<TokenAuthenticator>, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self {
            authenticator,
            shutdown,
        }
    }

    /// Decide the fate of an upgrade carrying `token`.
    pub fn evaluate(&self, token: Option<&str>) -> GateDecision {
        if self.shutdown.is_stopping() {
            info!("refusing upgrade during shutdown");
            return GateDecision::ShuttingDown;
        }
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return GateDecision::Accept {
                identity: ANONYMOUS_IDENTITY.to_owned(),
            };
        };
        match self.authenticator.verify(token) {
            Ok(identity) => GateDecision::Accept { identity },
            Err(reason) => {
                warn!(error = %reason, "authentication failed");
                metrics::counter!("relay_auth_rejections_total").increment(1);
                GateDecision::Reject { reason }
            }
        }
    }
}

/// Send the authentication error payload and close with 1008.
pub async fn reject<S>(mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    if let Ok(json) = serde_json::to_string(&ErrorPayload::new(AUTH_FAILED)) {
        let _ = sink.send(Message::Text(json.into())).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY_VIOLATION,
            reason: AUTH_CLOSE_REASON.into(),
        })))
        .await;
}

/// Close an upgrade that arrived during shutdown with 1001.
pub async fn refuse<S>(mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::GOING_AWAY,
            reason: SHUTDOWN_REASON.into(),
        })))
        .await;
}
