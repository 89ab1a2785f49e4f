//! Message fan-out to every open connection.

use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use relay_core::RelayMessage;
use tracing::{debug, info};

use crate::errors::RelayError;
use crate::registry::ConnectionRegistry;

/// Outcome of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the registry snapshot.
    pub recipients: usize,
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections that were not open or whose queue was full.
    pub skipped: usize,
}

/// Delivers messages to every connection in the registry, sender included.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `message` once and queue it on every open connection.
    ///
    /// Peers that cannot take the write are skipped; one failing peer never
    /// stops delivery to the rest.
    pub async fn broadcast(&self, message: &RelayMessage) -> Result<BroadcastReport, RelayError> {
        let text: Utf8Bytes = serde_json::to_string(message)?.into();
        let mut report = BroadcastReport::default();

        self.registry
            .for_each(|conn| {
                report.recipients += 1;
                if conn.send(text.clone()) {
                    report.delivered += 1;
                } else {
                    report.skipped += 1;
                    debug!(conn_id = %conn.id(), state = ?conn.state(), "skipped broadcast recipient");
                }
            })
            .await;

        metrics::counter!("relay_broadcast_deliveries_total").increment(report.delivered as u64);
        info!(
            sender = %message.sender,
            recipients = report.recipients,
            delivered = report.delivered,
            skipped = report.skipped,
            "broadcast message"
        );
        Ok(report)
    }
}
