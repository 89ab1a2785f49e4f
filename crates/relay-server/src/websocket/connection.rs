//! A live client connection and its outbound writer.
//!
//! Writes never touch the socket directly: text goes through a bounded queue
//! and close requests through a `watch` slot, both drained by
//! [`write_loop`]. A close request flushes whatever is already queued before
//! the close frame goes out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use futures::{Sink, SinkExt};
use metrics::counter;
use relay_core::{ConnectionId, ErrorPayload};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// Close reasons must fit a control frame (125 bytes minus the code).
const MAX_CLOSE_REASON: usize = 123;

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepting reads and writes.
    Open = 0,
    /// A close frame has been requested; no further writes are accepted.
    Closing = 1,
    /// The transport is gone.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A pending close frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// Status code; `None` sends a close frame without a body.
    pub code: Option<u16>,
    /// Reason string, truncated to fit a control frame.
    pub reason: String,
}

/// Receiving half of a connection, consumed by [`write_loop`].
pub struct Outbound {
    pub(crate) messages: mpsc::Receiver<Utf8Bytes>,
    pub(crate) close: watch::Receiver<Option<CloseRequest>>,
}

/// A connected client.
pub struct Connection {
    id: ConnectionId,
    identity: String,
    state: AtomicU8,
    tx: mpsc::Sender<Utf8Bytes>,
    close_tx: watch::Sender<Option<CloseRequest>>,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create an open connection bound to `identity`.
    ///
    /// `queue` is the outbound capacity in messages (at least 1).
    pub fn new(identity: impl Into<String>, queue: usize) -> (Arc<Self>, Outbound) {
        let (tx, messages) = mpsc::channel(queue.max(1));
        let (close_tx, close) = watch::channel(None);
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            identity: identity.into(),
            state: AtomicU8::new(ConnectionState::Open as u8),
            tx,
            close_tx,
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        });
        (connection, Outbound { messages, close })
    }

    /// Unique connection handle.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity bound at upgrade time.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection still accepts writes.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a text frame.
    ///
    /// Returns `false` when the connection is not open or its queue is full
    /// or closed; the latter increments the dropped message counter.
    pub fn send(&self, text: Utf8Bytes) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!("relay_messages_dropped_total").increment(1);
            false
        }
    }

    /// Serialize `value` as JSON and queue it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(json.into()),
            Err(_) => false,
        }
    }

    /// Queue an `{"error": ...}` payload.
    pub fn send_error(&self, error: &str) -> bool {
        self.send_json(&ErrorPayload::new(error))
    }

    /// Request a close frame.
    ///
    /// Only the first request wins; later calls return `false` and do
    /// nothing.
    pub fn close(&self, code: Option<u16>, reason: &str) -> bool {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        let _ = self.close_tx.send_replace(Some(CloseRequest {
            code,
            reason: truncate_reason(reason),
        }));
        true
    }

    /// Resolves once a close has been requested.
    pub async fn close_requested(&self) {
        let mut rx = self.close_tx.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Mark the transport as gone, returning the previous state.
    pub(crate) fn mark_closed(&self) -> ConnectionState {
        ConnectionState::from_u8(
            self.state
                .swap(ConnectionState::Closed as u8, Ordering::AcqRel),
        )
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_owned();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_owned()
}

/// Drain a connection's outbound side into the socket.
///
/// Ends after sending a requested close frame, when the queue closes, or
/// when the sink fails.
pub async fn write_loop<S>(mut sink: S, outbound: Outbound)
where
    S: Sink<Message> + Unpin,
{
    let Outbound {
        mut messages,
        mut close,
    } = outbound;

    loop {
        tokio::select! {
            changed = close.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(request) = close.borrow_and_update().clone() else {
                    continue;
                };
                while let Ok(text) = messages.try_recv() {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let frame = request.code.map(|code| CloseFrame {
                    code,
                    reason: request.reason.into(),
                });
                let _ = sink.send(Message::Close(frame)).await;
                break;
            }
            next = messages.recv() => {
                let Some(text) = next else { break };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}
