//! Per-frame message processing.
//!
//! decode → stamp sender → dispatch. Dispatch runs the custom handler when
//! one is configured, otherwise pre-hook → broadcast → post-hook. Failures
//! inside dispatch (including panics) are reported to the sender and the
//! connection stays open; a decode failure closes the connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use relay_core::RelayMessage;
use relay_core::constants::{INTERNAL_ERROR, INVALID_JSON};
use tracing::{debug, error};

use crate::context::RelayContext;
use crate::errors::RelayError;
use crate::hooks::HandlerContext;
use crate::websocket::connection::Connection;

/// What the read loop should do after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep reading.
    Continue,
    /// The connection has been asked to close.
    Close,
}

/// Process one inbound data frame from `conn`.
pub async fn process_frame(bytes: &[u8], conn: &Arc<Connection>, ctx: &RelayContext) -> FrameOutcome {
    let message = match RelayMessage::decode(bytes) {
        Ok(message) => message.stamped(conn.identity()),
        Err(err) => {
            error!(conn_id = %conn.id(), identity = conn.identity(), error = %err, "failed to decode message");
            let _ = conn.send_error(INVALID_JSON);
            let _ = conn.close(None, "");
            return FrameOutcome::Close;
        }
    };
    metrics::counter!("relay_messages_total").increment(1);
    debug!(conn_id = %conn.id(), identity = conn.identity(), "message received");

    let result = AssertUnwindSafe(dispatch(message, conn, ctx))
        .catch_unwind()
        .await
        .unwrap_or(Err(RelayError::HookPanicked));

    if let Err(err) = result {
        error!(conn_id = %conn.id(), identity = conn.identity(), error = %err, "failed to process message");
        let _ = conn.send_error(INTERNAL_ERROR);
    }
    FrameOutcome::Continue
}

async fn dispatch(message: RelayMessage, conn: &Arc<Connection>, ctx: &RelayContext) -> Result<(), RelayError> {
    if let Some(handler) = ctx.hooks.handler() {
        let handler_ctx = HandlerContext::new(conn.clone(), ctx.broadcaster.clone());
        return handler
            .handle(message, handler_ctx)
            .await
            .map_err(RelayError::from);
    }

    if let Some(pre) = ctx.hooks.pre_broadcast() {
        pre.call(&message, conn).await?;
    }
    let _ = ctx.broadcaster.broadcast(&message).await?;
    if let Some(post) = ctx.hooks.post_broadcast() {
        post.call(&message, conn).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use relay_auth::TokenAuthenticator;
    use relay_core::logging::capture_logs;
    use serde_json::{Value, json};
    use tracing::Level;

    use crate::hooks::{HookError, HookSet, Hooks, MessageHandler};
    use crate::registry::ConnectionRegistry;
    use crate::shutdown::ShutdownCoordinator;
    use crate::websocket::broadcast::Broadcaster;
    use crate::websocket::connection::{ConnectionState, Outbound};

    fn context(hooks: &Hooks) -> RelayContext {
        let registry = Arc::new(ConnectionRegistry::new());
        RelayContext {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            authenticator: Arc::new(TokenAuthenticator::new("secret", Duration::from_secs(60))),
            hooks: Arc::new(HookSet::new(hooks)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            outbound_queue: 16,
        }
    }

    async fn join(ctx: &RelayContext, identity: &str) -> (Arc<Connection>, Outbound) {
        let (conn, out) = Connection::new(identity, ctx.outbound_queue);
        let _ = ctx.registry.register(conn.clone()).await;
        (conn, out)
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn forged_sender_is_overwritten() {
        let ctx = context(&Hooks::default());
        let (alice, _out_a) = join(&ctx, "alice").await;
        let (_bob, mut out_b) = join(&ctx, "Anonymous").await;

        let outcome = process_frame(br#"{"sender":"forged","content":"hi"}"#, &alice, &ctx).await;
        assert_eq!(outcome, FrameOutcome::Continue);

        let received = out_b.messages.recv().await.unwrap();
        assert_eq!(parse(received.as_str()), json!({"sender": "alice", "content": "hi"}));
    }

    #[tokio::test]
    async fn decode_failure_replies_and_closes() {
        let ctx = context(&Hooks::default());
        let (conn, mut out) = join(&ctx, "alice").await;
        let (other, _out_o) = join(&ctx, "bob").await;

        let outcome = process_frame(b"not json", &conn, &ctx).await;
        assert_eq!(outcome, FrameOutcome::Close);
        assert_eq!(
            out.messages.recv().await.unwrap().as_str(),
            r#"{"error":"Invalid JSON format"}"#
        );
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(other.is_open());
    }

    #[tokio::test]
    async fn non_object_json_is_a_decode_failure() {
        let ctx = context(&Hooks::default());
        let (conn, _out) = join(&ctx, "alice").await;
        assert_eq!(process_frame(b"[1,2]", &conn, &ctx).await, FrameOutcome::Close);
    }

    #[tokio::test]
    async fn failing_pre_hook_reports_and_keeps_connection() {
        fn reject(_m: &RelayMessage, _c: &Connection) -> Result<(), HookError> {
            Err(HookError::new("nope"))
        }
        let ctx = context(&Hooks::default().with_pre_broadcast(reject));
        let (conn, mut out) = join(&ctx, "alice").await;

        let outcome = process_frame(br#"{"content":1}"#, &conn, &ctx).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(conn.is_open());
        // The broadcast never ran, so the only frame is the error.
        assert_eq!(
            out.messages.recv().await.unwrap().as_str(),
            r#"{"error":"Internal server error"}"#
        );
        assert!(out.messages.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn panicking_hook_is_caught() {
        fn boom(_m: &RelayMessage, _c: &Connection) -> Result<(), HookError> {
            panic!("hook exploded");
        }
        let (logs, _guard) = capture_logs();
        let ctx = context(&Hooks::default().with_post_broadcast(boom));
        let (conn, mut out) = join(&ctx, "alice").await;

        let outcome = process_frame(br#"{"content":"x"}"#, &conn, &ctx).await;
        assert_eq!(outcome, FrameOutcome::Continue);
        assert!(conn.is_open());

        // Broadcast ran before the post-hook panicked.
        assert_eq!(
            parse(out.messages.recv().await.unwrap().as_str()),
            json!({"sender": "alice", "content": "x"})
        );
        assert_eq!(
            out.messages.recv().await.unwrap().as_str(),
            r#"{"error":"Internal server error"}"#
        );
        assert!(logs.has_event(Level::ERROR, "failed to process message"));

        // The next message is still processed.
        assert_eq!(process_frame(br#"{"content":"y"}"#, &conn, &ctx).await, FrameOutcome::Continue);
    }

    #[tokio::test]
    async fn hooks_run_around_broadcast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pre_calls = calls.clone();
        let post_calls = calls.clone();
        let hooks = Hooks::default()
            .with_pre_broadcast(move |m: &RelayMessage, _c: &Connection| {
                assert_eq!(m.sender, "alice");
                let _ = pre_calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HookError>(())
            })
            .with_post_broadcast(move |_m: &RelayMessage, _c: &Connection| {
                let _ = post_calls.fetch_add(10, Ordering::SeqCst);
                Ok::<(), HookError>(())
            });
        let ctx = context(&hooks);
        let (conn, _out) = join(&ctx, "alice").await;

        let _ = process_frame(br#"{"sender":"x","content":null}"#, &conn, &ctx).await;
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        async fn handle(&self, message: RelayMessage, ctx: HandlerContext) -> Result<(), HookError> {
            let _ = ctx.reply(&json!({"echo": message.content, "from": ctx.identity()}));
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_replaces_default_pipeline() {
        fn never(_m: &RelayMessage, _c: &Connection) -> Result<(), HookError> {
            panic!("pre-hook must not run when a handler is set");
        }
        let hooks = Hooks::default().with_handler(Echo).with_pre_broadcast(never);
        let ctx = context(&hooks);
        let (conn, mut out) = join(&ctx, "alice").await;
        let (_bob, mut out_b) = join(&ctx, "bob").await;

        let _ = process_frame(br#"{"content":42}"#, &conn, &ctx).await;
        assert_eq!(
            parse(out.messages.recv().await.unwrap().as_str()),
            json!({"echo": 42, "from": "alice"})
        );
        // No broadcast reached the other peer.
        assert!(out_b.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn replaced_lifecycle_hooks_apply_to_next_message() {
        let ctx = context(&Hooks::default());
        let (conn, mut out) = join(&ctx, "alice").await;

        fn reject(_m: &RelayMessage, _c: &Connection) -> Result<(), HookError> {
            Err(HookError::new("closed for business"))
        }
        ctx.hooks.set_lifecycle(Some(Arc::new(reject)), None);

        let _ = process_frame(br#"{"content":1}"#, &conn, &ctx).await;
        assert_eq!(
            out.messages.recv().await.unwrap().as_str(),
            r#"{"error":"Internal server error"}"#
        );
    }
}
