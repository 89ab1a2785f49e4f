//! Wire envelope exchanged with clients.
//!
//! Inbound and outbound messages share one shape: `{ "sender": string,
//! "content": any }`. Only the envelope is validated; `content` is carried as
//! an opaque [`serde_json::Value`]. Errors sent to a client are
//! `{ "error": string }`.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A relayed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Identity of the originating connection.
    #[serde(default)]
    pub sender: String,
    /// Opaque payload.
    #[serde(default)]
    pub content: Value,
}

impl RelayMessage {
    /// Create a message from a sender and payload.
    pub fn new(sender: impl Into<String>, content: Value) -> Self {
        Self {
            sender: sender.into(),
            content,
        }
    }

    /// Decode an inbound frame.
    ///
    /// The frame must be a JSON object. A missing `content` decodes as
    /// `null`; a `sender` that is not a string is dropped, since the server
    /// overwrites it anyway.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(mut map) = value else {
            return Err(serde_json::Error::custom("message must be a JSON object"));
        };
        let sender = match map.remove("sender") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let content = map.remove("content").unwrap_or(Value::Null);
        Ok(Self { sender, content })
    }

    /// Replace the sender with the server-side identity.
    #[must_use]
    pub fn stamped(mut self, identity: &str) -> Self {
        identity.clone_into(&mut self.sender);
        self
    }
}

/// Error body sent to a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error.
    pub error: String,
}

impl ErrorPayload {
    /// Create an error payload.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
