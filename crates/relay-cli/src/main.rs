//! # relay
//!
//! Relay server binary: loads settings, installs logging, and serves the
//! `WebSocket` relay until ctrl-c. `relay token <identity>` prints a token
//! signed with the configured secret.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::logging::init_subscriber;
use relay_server::{Hooks, RelayServer, ServerConfig};
use relay_settings::{RelaySettings, load_settings_from_path, settings_path};

/// `WebSocket` relay server.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "WebSocket relay server")]
struct Cli {
    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the relay server (default).
    Serve,
    /// Print a token bound to an identity.
    Token {
        /// Identity to bind.
        identity: String,
    },
}

impl Cli {
    fn load_settings(&self) -> Result<RelaySettings> {
        let path = self.config.clone().unwrap_or_else(settings_path);
        let mut settings = load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if settings.enable_logging {
        init_subscriber(&settings.log_level, settings.log_format);
    }

    let config = ServerConfig::from_settings(&settings).context("Invalid settings")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Token { identity } => {
            if settings.secret_key.is_empty() {
                tracing::warn!("no secretKey configured; this token only verifies against itself");
            }
            let server = RelayServer::new(config, Hooks::default());
            let token = server
                .issue_token(&identity)
                .context("Failed to issue token")?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let server = RelayServer::new(config, Hooks::default());
    let addr = server.start().await.context("Failed to start server")?;
    tracing::info!("relay listening on ws://{addr}{}", server.config().transport.path);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.stop().await.context("Shutdown failed")?;
    tracing::info!("Shutdown complete");
    Ok(())
}
