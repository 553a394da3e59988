//! # v8bridge-settings
//!
//! Configuration for the bridge, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BridgeSettings::default()`]
//! 2. **User file**: `~/.v8bridge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `V8BRIDGE_*` overrides
//!
//! The binary layers command-line flags on top.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, load_settings_with,
    settings_path,
};
pub use types::*;
