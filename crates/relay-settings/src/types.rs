//! Settings types.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Top-level relay settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// HMAC secret for signing tokens. Empty means "generate one at startup".
    pub secret_key: String,
    /// Token lifetime as a duration string (`"1h"`, `"2d"`).
    pub token_expiry: String,
    /// Whether the binary installs a log subscriber.
    pub enable_logging: bool,
    /// Minimum log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// `WebSocket` transport options.
    pub transport: TransportSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            secret_key: String::new(),
            token_expiry: "1h".to_string(),
            enable_logging: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            transport: TransportSettings::default(),
        }
    }
}

/// Options passed through to the `WebSocket` transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// HTTP path that accepts upgrades.
    pub path: String,
    /// Maximum inbound message size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,
    /// Maximum inbound frame size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_size: Option<usize>,
    /// Target size of the write buffer in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_buffer_size: Option<usize>,
    /// Per-connection outbound queue capacity, in messages.
    pub outbound_queue: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_message_size: None,
            max_frame_size: None,
            write_buffer_size: None,
            outbound_queue: 1024,
        }
    }
}

/// Generate a random 256-bit signing secret, base64url encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
