//! # relay-server
//!
//! Axum HTTP server with a `WebSocket` relay endpoint.
//!
//! - Upgrade gate: optional `?token=` verified at upgrade time; no token
//!   means the anonymous identity, a bad token means close 1008
//! - Connection registry shared by every connection task
//! - Per-connection pipeline: decode → stamp sender → handler, or
//!   pre-hook → broadcast → post-hook
//! - Broadcast fan-out to every open connection
//! - Coordinated shutdown: 1001 to every connection, then stop accepting
//! - `/health` endpoint and caller-supplied routes

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod hooks;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::RelayError;
pub use hooks::{BroadcastHook, HandlerContext, HookError, Hooks, MessageHandler};
pub use server::RelayServer;
pub use websocket::broadcast::BroadcastReport;
