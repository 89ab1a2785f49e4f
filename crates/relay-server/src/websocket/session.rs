//! `WebSocket` session lifecycle: a single accepted client from registration
//! through disconnect.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use relay_core::close_code;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::connection::{Connection, ConnectionState, write_loop};
use super::pipeline::{FrameOutcome, process_frame};
use crate::context::RelayContext;
use crate::shutdown::SHUTDOWN_REASON;

/// How long a closing connection waits for the peer's close reply. Counted
/// once from the first read after the close request, whatever the peer sends.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Run an accepted session bound to `identity`.
pub async fn run_session(ws: WebSocket, identity: String, ctx: RelayContext) {
    let (sink, stream) = ws.split();
    drive(sink, stream, identity, ctx).await;
}

/// Register, run the read loop until the transport ends, then clean up.
///
/// 1. Register the connection and spawn its writer
/// 2. Feed data frames through the pipeline in arrival order
/// 3. Once a close is requested, stop processing and wait briefly for the
///    peer's close reply
/// 4. Unregister and log the disconnect
pub(crate) async fn drive<Si, St, E>(sink: Si, mut stream: St, identity: String, ctx: RelayContext)
where
    Si: Sink<Message> + Send + Unpin + 'static,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    if ctx.shutdown.is_stopping() {
        super::gate::refuse(sink).await;
        return;
    }
    let (conn, outbound) = Connection::new(identity, ctx.outbound_queue);
    let _ = ctx.registry.register(conn.clone()).await;
    info!(conn_id = %conn.id(), identity = conn.identity(), "client connected");
    counter!("relay_connections_total").increment(1);
    gauge!("relay_connections_active").increment(1.0);

    // Shutdown may have swept the registry between the check and the insert.
    if ctx.shutdown.is_stopping() {
        let _ = conn.close(Some(close_code::GOING_AWAY), SHUTDOWN_REASON);
    }

    let mut writer = tokio::spawn(write_loop(sink, outbound));
    let mut close_deadline: Option<Instant> = None;

    loop {
        let next = if conn.is_open() {
            tokio::select! {
                next = stream.next() => next,
                () = conn.close_requested() => continue,
            }
        } else {
            let deadline = *close_deadline.get_or_insert_with(|| Instant::now() + CLOSE_GRACE);
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(conn_id = %conn.id(), "peer did not answer close");
                    break;
                }
            }
        };

        let frame = match next {
            None => break,
            // The transport decides whether the stream survives; it ends with `None`.
            Some(Err(err)) => {
                error!(conn_id = %conn.id(), identity = conn.identity(), error = %err, "websocket transport error");
                continue;
            }
            Some(Ok(frame)) => frame,
        };

        match frame {
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            // Data after a close request is discarded.
            _ if !conn.is_open() => {}
            Message::Text(text) => {
                if process_frame(text.as_bytes(), &conn, &ctx).await == FrameOutcome::Close {
                    debug!(conn_id = %conn.id(), "closing after undecodable frame");
                }
            }
            Message::Binary(data) => {
                if process_frame(&data, &conn, &ctx).await == FrameOutcome::Close {
                    debug!(conn_id = %conn.id(), "closing after undecodable frame");
                }
            }
        }
    }

    let previous = conn.mark_closed();
    let _ = ctx.registry.unregister(conn.id()).await;
    if previous == ConnectionState::Closing {
        // Let the writer finish flushing the close frame.
        if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
            writer.abort();
        }
    } else {
        writer.abort();
    }

    info!(
        conn_id = %conn.id(),
        identity = conn.identity(),
        dropped = conn.drop_count(),
        "client disconnected"
    );
    gauge!("relay_connections_active").decrement(1.0);
    histogram!("relay_connection_duration_seconds").record(conn.age().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;

    use futures::channel::mpsc as fmpsc;
    use relay_auth::TokenAuthenticator;
    use serde_json::{Value, json};

    use crate::hooks::{HookSet, Hooks};
    use crate::registry::ConnectionRegistry;
    use crate::shutdown::ShutdownCoordinator;
    use crate::websocket::broadcast::Broadcaster;

    fn context() -> RelayContext {
        let registry = Arc::new(ConnectionRegistry::new());
        RelayContext {
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            authenticator: Arc::new(TokenAuthenticator::new("secret", Duration::from_secs(60))),
            hooks: Arc::new(HookSet::new(&Hooks::default())),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            outbound_queue: 16,
        }
    }

    struct Client {
        inbound: fmpsc::UnboundedSender<Result<Message, Infallible>>,
        outbound: fmpsc::UnboundedReceiver<Message>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_session(ctx: &RelayContext, identity: &str) -> Client {
        let (sink, outbound) = fmpsc::unbounded::<Message>();
        let (inbound, stream) = fmpsc::unbounded::<Result<Message, Infallible>>();
        let task = tokio::spawn(drive(sink, stream, identity.to_owned(), ctx.clone()));
        Client {
            inbound,
            outbound,
            task,
        }
    }

    async fn wait_for_len(ctx: &RelayContext, len: usize) {
        for _ in 0..100 {
            if ctx.registry.len().await == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry never reached {len} entries");
    }

    fn text(msg: &Message) -> Value {
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registers_until_peer_closes() {
        let ctx = context();
        let client = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;

        client.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        client.task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn relays_between_sessions() {
        let ctx = context();
        let alice = spawn_session(&ctx, "alice");
        let mut bob = spawn_session(&ctx, "bob");
        wait_for_len(&ctx, 2).await;

        alice
            .inbound
            .unbounded_send(Ok(Message::Text(r#"{"sender":"forged","content":"hi"}"#.into())))
            .unwrap();
        let received = bob.outbound.next().await.unwrap();
        assert_eq!(text(&received), json!({"sender": "alice", "content": "hi"}));
    }

    #[tokio::test]
    async fn binary_frames_are_decoded() {
        let ctx = context();
        let mut alice = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;

        alice
            .inbound
            .unbounded_send(Ok(Message::Binary(br#"{"content":[1,2]}"#.to_vec().into())))
            .unwrap();
        let received = alice.outbound.next().await.unwrap();
        assert_eq!(text(&received), json!({"sender": "alice", "content": [1, 2]}));
    }

    #[tokio::test]
    async fn invalid_json_gets_error_then_close() {
        let ctx = context();
        let mut alice = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;

        alice
            .inbound
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();
        let first = alice.outbound.next().await.unwrap();
        assert_eq!(text(&first), json!({"error": "Invalid JSON format"}));
        assert!(matches!(alice.outbound.next().await, Some(Message::Close(_))));

        // Peer answers the close; the session ends and unregisters.
        alice.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        alice.task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn stream_end_unregisters() {
        let ctx = context();
        let client = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;
        drop(client.inbound);
        client.task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_released_after_grace() {
        let ctx = context();
        let mut alice = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;

        let _ = ctx.shutdown.close_all(&ctx.registry).await;
        match alice.outbound.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1001),
            other => panic!("expected 1001 close, got {other:?}"),
        }
        // The peer never replies; the session gives up on its own.
        alice.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn chatty_peer_released_after_grace() {
        let ctx = context();
        let mut alice = spawn_session(&ctx, "alice");
        wait_for_len(&ctx, 1).await;

        alice
            .inbound
            .unbounded_send(Ok(Message::Text("not json".into())))
            .unwrap();
        let _ = alice.outbound.next().await.unwrap();
        assert!(matches!(alice.outbound.next().await, Some(Message::Close(_))));

        // Keep sending well past the grace period without ever closing.
        let inbound = alice.inbound.clone();
        let feeder = tokio::spawn(async move {
            for _ in 0..30 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if inbound
                    .unbounded_send(Ok(Message::Text(r#"{"content":"still here"}"#.into())))
                    .is_err()
                {
                    break;
                }
            }
        });

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(10), alice.task)
            .await
            .expect("session outlived the close grace")
            .unwrap();
        assert!(started.elapsed() <= CLOSE_GRACE + Duration::from_secs(1));
        assert!(ctx.registry.is_empty().await);
        feeder.abort();
    }

    #[tokio::test]
    async fn transport_error_does_not_end_session() {
        let ctx = context();
        let (sink, mut outbound) = fmpsc::unbounded::<Message>();
        let (inbound, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let task = tokio::spawn(drive(sink, stream, "alice".to_owned(), ctx.clone()));
        wait_for_len(&ctx, 1).await;

        inbound.unbounded_send(Err("connection reset".to_owned())).unwrap();
        inbound
            .unbounded_send(Ok(Message::Text(r#"{"content":"after"}"#.into())))
            .unwrap();
        let received = outbound.next().await.unwrap();
        assert_eq!(text(&received), json!({"sender": "alice", "content": "after"}));
        assert_eq!(ctx.registry.len().await, 1);

        drop(inbound);
        task.await.unwrap();
        assert!(ctx.registry.is_empty().await);
    }

    #[tokio::test]
    async fn refused_once_stopping() {
        let ctx = context();
        let _ = ctx.shutdown.begin_stop();
        let mut client = spawn_session(&ctx, "late");
        client.task.await.unwrap();
        match client.outbound.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, 1001),
            other => panic!("expected 1001 close, got {other:?}"),
        }
        assert!(ctx.registry.is_empty().await);
    }
}
