//! Resolved server configuration.

use std::fmt;
use std::time::Duration;

use relay_settings::{RelaySettings, SettingsError, TransportSettings, generate_secret, parse_duration};

/// Default token lifetime.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Configuration for the relay server.
///
/// Unlike [`RelaySettings`], the secret and expiry here are always usable:
/// the expiry is parsed and an empty secret has been replaced.
#[derive(Clone)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Token signing secret.
    pub secret_key: String,
    /// Token lifetime.
    pub token_expiry: Duration,
    /// `WebSocket` transport options.
    pub transport: TransportSettings,
}

impl ServerConfig {
    /// Resolve loaded settings into a server configuration.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, SettingsError> {
        let token_expiry = parse_duration(&settings.token_expiry)?;
        let secret_key = if settings.secret_key.is_empty() {
            generate_secret()
        } else {
            settings.secret_key.clone()
        };
        Ok(Self {
            host: settings.host.clone(),
            port: settings.port,
            secret_key,
            token_expiry,
            transport: settings.transport.clone(),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            secret_key: generate_secret(),
            token_expiry: DEFAULT_TOKEN_EXPIRY,
            transport: TransportSettings::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secret_key", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert!(!cfg.secret_key.is_empty());
        assert_eq!(cfg.token_expiry, Duration::from_secs(3600));
        assert_eq!(cfg.transport.path, "/");
    }

    #[test]
    fn default_secrets_differ() {
        assert_ne!(
            ServerConfig::default().secret_key,
            ServerConfig::default().secret_key
        );
    }

    #[test]
    fn from_settings_parses_expiry() {
        let settings = RelaySettings {
            token_expiry: "2d".into(),
            secret_key: "s3cret".into(),
            port: 9000,
            ..RelaySettings::default()
        };
        let cfg = ServerConfig::from_settings(&settings).unwrap();
        assert_eq!(cfg.token_expiry, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(cfg.secret_key, "s3cret");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn from_settings_fills_empty_secret() {
        let cfg = ServerConfig::from_settings(&RelaySettings::default()).unwrap();
        assert_eq!(cfg.secret_key.len(), 43);
    }

    #[test]
    fn from_settings_rejects_bad_expiry() {
        let settings = RelaySettings {
            token_expiry: "soon".into(),
            ..RelaySettings::default()
        };
        assert!(ServerConfig::from_settings(&settings).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let cfg = ServerConfig {
            secret_key: "hunter2".into(),
            ..ServerConfig::default()
        };
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
