//! # relay-core
//!
//! Shared vocabulary for the relay crates:
//!
//! - **Wire envelope**: [`RelayMessage`] (`{ sender, content }`) and
//!   [`ErrorPayload`] (`{ error }`)
//! - **Identifiers**: [`ConnectionId`], a UUID v7 newtype
//! - **Constants**: the anonymous identity, close codes, error strings
//! - **Logging**: `tracing` subscriber setup and a capture layer for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use constants::{ANONYMOUS_IDENTITY, close_code};
pub use ids::ConnectionId;
pub use protocol::{ErrorPayload, RelayMessage};
