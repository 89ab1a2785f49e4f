//! # relay-settings
//!
//! Configuration for the relay server, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **Settings file** — `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `RELAY_*` overrides (highest priority)
//!
//! Token expiry is written as a duration string (`"1h"`, `"2d"`) and parsed
//! with [`parse_duration`].

#![deny(unsafe_code)]

pub mod duration;
pub mod errors;
pub mod loader;
pub mod types;

pub use duration::parse_duration;
pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{RelaySettings, TransportSettings, generate_secret};
