//! # wamp-settings
//!
//! Configuration for WAMP sessions and the TCP transport.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WampSettings::default()`]
//! 2. **User file**: `~/.wamp/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WAMP_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{LoggingSettings, SessionSettings, TransportSettings, WampSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<WampSettings> = OnceLock::new();

/// Global settings, loaded on first access.
///
/// Falls back to compiled defaults when the settings file cannot be read.
pub fn get_settings() -> &'static WampSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            WampSettings::default()
        })
    })
}

/// Install the global settings explicitly.
///
/// Returns the value back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WampSettings) -> std::result::Result<(), WampSettings> {
    SETTINGS.set(settings)
}
